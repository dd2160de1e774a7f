use thiserror::Error;
use vstore_config::ConfigError;
use vstore_refs::RefError;
use vstore_store::{ObjectKind, StoreError};
use vstore_types::{KeyError, ObjectId, StoreKey};

/// Errors surfaced by the commit protocol.
///
/// The retry loop only ever retries a compare-and-swap mismatch. Every other
/// failure is returned as soon as it is observed.
#[derive(Debug, Error)]
pub enum CommitError {
    /// The branch kept moving and the retry budget ran out.
    #[error("commit to {branch} gave up after {attempts} attempts")]
    RetriesExhausted { branch: String, attempts: u32 },

    /// The wall-clock budget ran out while the branch kept moving.
    #[error("commit to {branch} timed out after {elapsed_millis} ms and {attempts} attempts")]
    Timeout {
        branch: String,
        elapsed_millis: u64,
        attempts: u32,
    },

    /// An object cannot fit in the backend no matter how the index is split.
    #[error("{kind} object of {size} bytes exceeds the backend limit of {limit} bytes")]
    SizeLimitExceeded {
        kind: ObjectKind,
        size: usize,
        limit: usize,
    },

    #[error("malformed key: {0}")]
    MalformedKey(#[from] KeyError),

    /// Keys changed between the caller's expected head and the branch head.
    #[error("conflicting changes on {branch} for keys {keys:?}")]
    Conflict { branch: String, keys: Vec<StoreKey> },

    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("commit not found: {0}")]
    CommitNotFound(ObjectId),

    /// A backend serves a different repository than the configuration names.
    #[error("backend serves repository {actual:?} but the configuration names {expected:?}")]
    RepositoryMismatch { expected: String, actual: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("ref error: {0}")]
    Ref(#[from] RefError),
}

impl CommitError {
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_size_limit(&self) -> bool {
        matches!(self, Self::SizeLimitExceeded { .. })
    }

    pub fn is_malformed_key(&self) -> bool {
        matches!(self, Self::MalformedKey(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Failures of the object or reference backend, passed through unchanged.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::Ref(RefError::Unavailable(_) | RefError::Io(_))
        )
    }
}

pub type CommitResult<T> = Result<T, CommitError>;
