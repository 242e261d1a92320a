//! Storage engine for ltm long-term memories.
//!
//! Every memory is kept twice:
//! - **Markdown store**: one `<id>.md` file with YAML frontmatter, the human-readable copy
//! - **Relational index** (SQLite): memories, tag membership, links and tag co-occurrence
//!
//! [`MemorySubstrate`] is the only writer of either. It always writes the markdown file
//! before the index row, so a crash between the two leaves an orphaned file (recoverable
//! with [`MemorySubstrate::reindex`]) and never an index row without a file.

pub mod cooccurrence;
pub mod guard;
pub mod index;
pub mod markdown;
pub mod migration;
pub mod origin;
pub mod query;
pub mod tags;

mod substrate;
pub use substrate::MemorySubstrate;
