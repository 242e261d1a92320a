//! Tag normalization.

/// Normalize a tag: lowercase, whitespace runs become hyphens, punctuation is
/// stripped except `-`, `_` and the namespace separator `:`.
pub fn normalize_tag(tag: &str) -> String {
    let lowered = tag.trim().to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut in_space = false;
    for c in lowered.chars() {
        if c.is_whitespace() {
            in_space = true;
            continue;
        }
        if !(c.is_alphanumeric() || matches!(c, '-' | '_' | ':')) {
            continue;
        }
        if in_space && !out.is_empty() {
            out.push('-');
        }
        in_space = false;
        out.push(c);
    }
    out
}

/// Normalize a list of tags, dropping empties and duplicates.
///
/// Order of first occurrence is kept for presentation; callers treat the result as a set.
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = normalize_tag(tag.as_ref());
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
