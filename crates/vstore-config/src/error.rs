use thiserror::Error;

/// Errors raised while loading or validating a [`StoreConfig`](crate::StoreConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A value could not be parsed for its key.
    #[error("invalid value for {key}: {value:?}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    /// Values parsed but are inconsistent, or do not fit the backend.
    #[error("invalid configuration: {key}: {reason}")]
    Constraint { key: &'static str, reason: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
