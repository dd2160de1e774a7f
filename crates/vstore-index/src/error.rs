//! Error types for the index crate.

/// Errors that can occur while encoding or decoding an index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Decoded bytes were not a canonical index encoding.
    #[error("corrupt index: {0}")]
    Corrupt(String),
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
