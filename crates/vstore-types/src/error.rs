use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Errors produced when constructing or parsing a [`StoreKey`](crate::StoreKey).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// A key must have at least one segment.
    #[error("key must have at least one segment")]
    Empty,

    /// Segments must be non-empty strings.
    #[error("key segment {index} is empty")]
    EmptySegment { index: usize },

    /// The reserved group separator is not allowed as literal input.
    #[error("key segment {index} contains the reserved separator U+001D")]
    ReservedCharacter { index: usize },
}
