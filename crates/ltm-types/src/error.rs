//! Shared error types for the ltm system.

use thiserror::Error;

/// Top-level error type for the ltm system.
#[derive(Error, Debug)]
pub enum LtmError {
    /// The identifier is not a slug, or resolves outside the memory directory.
    #[error("Invalid memory ID: {0:?}. Must contain only lowercase letters, digits, and hyphens")]
    InvalidIdentifier(String),

    /// The memory is absent from the index or the markdown store.
    #[error("Memory not found: {0}")]
    NotFound(String),

    /// A memory with this identifier already exists.
    #[error("Memory already exists: {0}")]
    AlreadyExists(String),

    /// Malformed configuration or origin definition.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A markdown file could not be parsed back into a memory.
    #[error("Failed to parse memory '{id}': {reason}")]
    Parse {
        /// The memory whose file is malformed.
        id: String,
        /// What the parser rejected.
        reason: String,
    },

    /// The markdown file was written but the index write that follows failed.
    /// The file is left in place and can be recovered by re-indexing.
    #[error("Index write failed for '{id}' (markdown file kept): {reason}")]
    IndexWrite {
        /// The memory whose index write failed.
        id: String,
        /// The underlying database error.
        reason: String,
    },

    /// A relational index error occurred.
    #[error("Index error: {0}")]
    Index(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid caller input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LtmError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LtmError::InvalidIdentifier(_) => "invalid_identifier",
            LtmError::NotFound(_) => "not_found",
            LtmError::AlreadyExists(_) => "already_exists",
            LtmError::Config(_) => "config_error",
            LtmError::Parse { .. } => "parse_error",
            LtmError::IndexWrite { .. } => "index_write_failed",
            LtmError::Index(_) => "index_error",
            LtmError::Serialization(_) => "serialization_error",
            LtmError::InvalidInput(_) => "invalid_input",
            LtmError::Io(_) => "io_error",
            LtmError::Internal(_) => "internal_error",
        }
    }
}

/// Alias for Result with LtmError.
pub type LtmResult<T> = Result<T, LtmError>;
