use vstore_types::ObjectId;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The object data is malformed or of an unexpected kind.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ObjectId, reason: String },

    /// The serialized object exceeds the backend's hard per-object limit.
    #[error("object of {size} bytes exceeds the backend's hard limit of {limit} bytes")]
    ObjectTooLarge { size: usize, limit: usize },

    /// Attempted to store an object under the reserved empty-root id.
    #[error("cannot store an object under the empty root id")]
    ReservedObjectId,

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend cannot serve requests (lock poisoned, connection lost).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
