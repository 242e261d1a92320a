//! Identifier validation and safe resolution of memory files.

use ltm_types::error::{LtmError, LtmResult};
use std::path::{Path, PathBuf};

/// Longest identifier accepted (keeps `<id>.md` well under filesystem name limits).
pub const MAX_ID_LEN: usize = 200;

/// Longest slug derived from a title.
const MAX_SLUG_LEN: usize = 80;

/// Validates memory identifiers and maps them to files under a fixed base directory.
#[derive(Debug, Clone)]
pub struct IdentifierGuard {
    base_dir: PathBuf,
}

impl IdentifierGuard {
    /// Create a guard rooted at `base_dir`, creating the directory if needed.
    pub fn new(base_dir: &Path) -> LtmResult<Self> {
        std::fs::create_dir_all(base_dir)?;
        let base_dir = std::fs::canonicalize(base_dir)?;
        Ok(Self { base_dir })
    }

    /// The canonical base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve an identifier to its markdown file path.
    ///
    /// Fails with `InvalidIdentifier` before any I/O if the identifier is not a slug
    /// or the joined path would leave the base directory.
    pub fn resolve(&self, id: &str) -> LtmResult<PathBuf> {
        validate_id(id)?;
        let path = self.base_dir.join(format!("{id}.md"));
        if path.parent() != Some(self.base_dir.as_path()) || !path.starts_with(&self.base_dir) {
            return Err(LtmError::InvalidIdentifier(id.to_string()));
        }
        Ok(path)
    }
}

/// Check that `id` is a non-empty slug of `[a-z0-9-]`.
pub fn validate_id(id: &str) -> LtmResult<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(LtmError::InvalidIdentifier(id.to_string()))
    }
}

/// Derive a slug identifier from a title.
///
/// Apostrophes are dropped, every other run of non-alphanumeric ASCII collapses to a
/// single hyphen. Returns `"memory"` when nothing usable is left.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if matches!(c, '\'' | '\u{2019}' | '`') {
            continue;
        }
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "memory".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_slugs() {
        for id in ["a", "hello-world", "2024-notes", "x-1-y"] {
            assert!(validate_id(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn test_validate_rejects_unsafe() {
        let long = "a".repeat(MAX_ID_LEN + 1);
        for id in [
            "",
            "..",
            "../etc/passwd",
            "a/b",
            "a\\b",
            "Upper",
            "under_score",
            "with space",
            "dot.md",
            "caf\u{e9}",
            "nul\0byte",
            long.as_str(),
        ] {
            assert!(
                matches!(validate_id(id), Err(LtmError::InvalidIdentifier(_))),
                "{id:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_stays_in_base() {
        let dir = tempfile::tempdir().unwrap();
        let guard = IdentifierGuard::new(dir.path()).unwrap();
        let path = guard.resolve("my-note").unwrap();
        assert_eq!(path.parent(), Some(guard.base_dir()));
        assert_eq!(path.file_name().unwrap(), "my-note.md");
        assert!(guard.resolve("../escape").is_err());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("Pytest's -x Flag: Stop!"), "pytests-x-flag-stop");
        assert_eq!(slugify("  Multiple   Spaces  "), "multiple-spaces");
        assert_eq!(slugify("!!!"), "memory");
        assert_eq!(slugify("Caf\u{e9} Notes"), "caf-notes");
    }

    #[test]
    fn test_slugify_truncates() {
        let slug = slugify(&"word ".repeat(40));
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
        assert!(validate_id(&slug).is_ok());
    }
}
