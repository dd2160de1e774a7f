//! The [`StoreConfig`] value and its key→string loading surface.

use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::RetryBackoff;
use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult};

pub const CONFIG_REPOSITORY_ID: &str = "repository-id";
pub const CONFIG_PARENTS_PER_COMMIT: &str = "parents-per-commit";
pub const CONFIG_COMMIT_TIMEOUT: &str = "commit-timeout-millis";
pub const CONFIG_COMMIT_RETRIES: &str = "commit-retries";
pub const CONFIG_RETRY_INITIAL_SLEEP_MILLIS_LOWER: &str = "retry-initial-sleep-millis-lower";
pub const CONFIG_RETRY_INITIAL_SLEEP_MILLIS_UPPER: &str = "retry-initial-sleep-millis-upper";
pub const CONFIG_RETRY_MAX_SLEEP_MILLIS: &str = "retry-max-sleep-millis";
pub const CONFIG_MAX_INCREMENTAL_INDEX_SIZE: &str = "max-incremental-index-size";
pub const CONFIG_MAX_SERIALIZED_INDEX_SIZE: &str = "max-serialized-index-size";
pub const CONFIG_MAX_REFERENCE_STRIPES_PER_COMMIT: &str = "max-reference-stripes-per-commit";
pub const CONFIG_ASSUMED_WALL_CLOCK_DRIFT_MICROS: &str = "assumed-wall-clock-drift-micros";
pub const CONFIG_NAMESPACE_VALIDATION: &str = "namespace-validation";

/// Every recognized configuration key, in display order.
pub const CONFIG_KEYS: &[&str] = &[
    CONFIG_REPOSITORY_ID,
    CONFIG_PARENTS_PER_COMMIT,
    CONFIG_COMMIT_TIMEOUT,
    CONFIG_COMMIT_RETRIES,
    CONFIG_RETRY_INITIAL_SLEEP_MILLIS_LOWER,
    CONFIG_RETRY_INITIAL_SLEEP_MILLIS_UPPER,
    CONFIG_RETRY_MAX_SLEEP_MILLIS,
    CONFIG_MAX_INCREMENTAL_INDEX_SIZE,
    CONFIG_MAX_SERIALIZED_INDEX_SIZE,
    CONFIG_MAX_REFERENCE_STRIPES_PER_COMMIT,
    CONFIG_ASSUMED_WALL_CLOCK_DRIFT_MICROS,
    CONFIG_NAMESPACE_VALIDATION,
];

pub const DEFAULT_PARENTS_PER_COMMIT: usize = 20;
pub const DEFAULT_COMMIT_TIMEOUT_MILLIS: u64 = 5_000;
/// `u32::MAX` is treated as "retry until the timeout".
pub const DEFAULT_COMMIT_RETRIES: u32 = u32::MAX;
pub const DEFAULT_RETRY_INITIAL_SLEEP_MILLIS_LOWER: u64 = 5;
pub const DEFAULT_RETRY_INITIAL_SLEEP_MILLIS_UPPER: u64 = 25;
pub const DEFAULT_RETRY_MAX_SLEEP_MILLIS: u64 = 250;
pub const DEFAULT_MAX_INCREMENTAL_INDEX_SIZE: usize = 50 * 1024;
pub const DEFAULT_MAX_SERIALIZED_INDEX_SIZE: usize = 200 * 1024;
pub const DEFAULT_MAX_REFERENCE_STRIPES_PER_COMMIT: usize = 50;
pub const DEFAULT_ASSUMED_WALL_CLOCK_DRIFT_MICROS: u64 = 5_000_000;
pub const DEFAULT_NAMESPACE_VALIDATION: bool = true;

/// Tunables of the commit protocol and index layout.
///
/// A plain value: build it with [`Default`] and the `with_*` adjusters, or
/// overlay key→string pairs with [`from_pairs`](Self::from_pairs). Nothing
/// here is consulted behind the caller's back; even the current time comes
/// from the injected [`Clock`].
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Disambiguates repositories sharing one backend.
    pub repository_id: String,
    /// Maximum length of a commit's ancestor tail.
    pub parents_per_commit: usize,
    pub commit_timeout_millis: u64,
    /// Retries after the first attempt, so `n` allows `n + 1` compare-and-swap
    /// attempts. `u32::MAX` means no limit besides the timeout.
    pub commit_retries: u32,
    pub retry_initial_sleep_millis_lower: u64,
    pub retry_initial_sleep_millis_upper: u64,
    pub retry_max_sleep_millis: u64,
    /// Serialized size above which the incremental index is spilled.
    pub max_incremental_index_size: usize,
    /// Ceiling for each reference index stripe.
    pub max_serialized_index_size: usize,
    /// Above this many stripes the stripe list moves to its own object.
    pub max_reference_stripes_per_commit: usize,
    /// Exposed for collaborators comparing timestamps across nodes.
    pub assumed_wall_clock_drift_micros: u64,
    /// Consumed by namespace-aware collaborators, not by the commit path.
    pub validate_namespaces: bool,
    pub clock: Arc<dyn Clock>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            repository_id: String::new(),
            parents_per_commit: DEFAULT_PARENTS_PER_COMMIT,
            commit_timeout_millis: DEFAULT_COMMIT_TIMEOUT_MILLIS,
            commit_retries: DEFAULT_COMMIT_RETRIES,
            retry_initial_sleep_millis_lower: DEFAULT_RETRY_INITIAL_SLEEP_MILLIS_LOWER,
            retry_initial_sleep_millis_upper: DEFAULT_RETRY_INITIAL_SLEEP_MILLIS_UPPER,
            retry_max_sleep_millis: DEFAULT_RETRY_MAX_SLEEP_MILLIS,
            max_incremental_index_size: DEFAULT_MAX_INCREMENTAL_INDEX_SIZE,
            max_serialized_index_size: DEFAULT_MAX_SERIALIZED_INDEX_SIZE,
            max_reference_stripes_per_commit: DEFAULT_MAX_REFERENCE_STRIPES_PER_COMMIT,
            assumed_wall_clock_drift_micros: DEFAULT_ASSUMED_WALL_CLOCK_DRIFT_MICROS,
            validate_namespaces: DEFAULT_NAMESPACE_VALIDATION,
            clock: Arc::new(SystemClock),
        }
    }
}

impl StoreConfig {
    /// Defaults overlaid with every key `lookup` has a value for.
    pub fn from_function<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        for key in CONFIG_KEYS {
            if let Some(value) = lookup(key) {
                config.set(key, &value)?;
            }
        }
        Ok(config)
    }

    /// Defaults overlaid with `pairs`. Later pairs win; unknown keys fail.
    pub fn from_pairs<I, K, V>(pairs: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::default().with_pairs(pairs)
    }

    /// Overlay `pairs` onto this configuration.
    pub fn with_pairs<I, K, V>(mut self, pairs: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in pairs {
            self.set(key.as_ref(), value.as_ref())?;
        }
        Ok(self)
    }

    /// Parse `value` and assign it to the field named by `key`.
    pub fn set(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let value = value.trim();
        match key {
            CONFIG_REPOSITORY_ID => self.repository_id = value.to_string(),
            CONFIG_PARENTS_PER_COMMIT => self.parents_per_commit = parse_value(key, value)?,
            CONFIG_COMMIT_TIMEOUT => self.commit_timeout_millis = parse_value(key, value)?,
            CONFIG_COMMIT_RETRIES => self.commit_retries = parse_value(key, value)?,
            CONFIG_RETRY_INITIAL_SLEEP_MILLIS_LOWER => {
                self.retry_initial_sleep_millis_lower = parse_value(key, value)?
            }
            CONFIG_RETRY_INITIAL_SLEEP_MILLIS_UPPER => {
                self.retry_initial_sleep_millis_upper = parse_value(key, value)?
            }
            CONFIG_RETRY_MAX_SLEEP_MILLIS => self.retry_max_sleep_millis = parse_value(key, value)?,
            CONFIG_MAX_INCREMENTAL_INDEX_SIZE => {
                self.max_incremental_index_size = parse_value(key, value)?
            }
            CONFIG_MAX_SERIALIZED_INDEX_SIZE => {
                self.max_serialized_index_size = parse_value(key, value)?
            }
            CONFIG_MAX_REFERENCE_STRIPES_PER_COMMIT => {
                self.max_reference_stripes_per_commit = parse_value(key, value)?
            }
            CONFIG_ASSUMED_WALL_CLOCK_DRIFT_MICROS => {
                self.assumed_wall_clock_drift_micros = parse_value(key, value)?
            }
            CONFIG_NAMESPACE_VALIDATION => self.validate_namespaces = parse_bool(key, value)?,
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// The effective values as key→string pairs, in [`CONFIG_KEYS`] order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (CONFIG_REPOSITORY_ID, self.repository_id.clone()),
            (CONFIG_PARENTS_PER_COMMIT, self.parents_per_commit.to_string()),
            (CONFIG_COMMIT_TIMEOUT, self.commit_timeout_millis.to_string()),
            (CONFIG_COMMIT_RETRIES, self.commit_retries.to_string()),
            (
                CONFIG_RETRY_INITIAL_SLEEP_MILLIS_LOWER,
                self.retry_initial_sleep_millis_lower.to_string(),
            ),
            (
                CONFIG_RETRY_INITIAL_SLEEP_MILLIS_UPPER,
                self.retry_initial_sleep_millis_upper.to_string(),
            ),
            (CONFIG_RETRY_MAX_SLEEP_MILLIS, self.retry_max_sleep_millis.to_string()),
            (
                CONFIG_MAX_INCREMENTAL_INDEX_SIZE,
                self.max_incremental_index_size.to_string(),
            ),
            (
                CONFIG_MAX_SERIALIZED_INDEX_SIZE,
                self.max_serialized_index_size.to_string(),
            ),
            (
                CONFIG_MAX_REFERENCE_STRIPES_PER_COMMIT,
                self.max_reference_stripes_per_commit.to_string(),
            ),
            (
                CONFIG_ASSUMED_WALL_CLOCK_DRIFT_MICROS,
                self.assumed_wall_clock_drift_micros.to_string(),
            ),
            (CONFIG_NAMESPACE_VALIDATION, self.validate_namespaces.to_string()),
        ]
    }

    /// Check internal consistency and fit against the backend's hard
    /// per-object size limit.
    pub fn validate(&self, hard_object_size_limit: usize) -> ConfigResult<()> {
        if self.parents_per_commit == 0 {
            return Err(constraint(CONFIG_PARENTS_PER_COMMIT, "must be at least 1"));
        }
        if self.max_reference_stripes_per_commit == 0 {
            return Err(constraint(
                CONFIG_MAX_REFERENCE_STRIPES_PER_COMMIT,
                "must be at least 1",
            ));
        }
        if self.retry_initial_sleep_millis_lower > self.retry_initial_sleep_millis_upper {
            return Err(constraint(
                CONFIG_RETRY_INITIAL_SLEEP_MILLIS_LOWER,
                format!(
                    "{} exceeds {CONFIG_RETRY_INITIAL_SLEEP_MILLIS_UPPER} {}",
                    self.retry_initial_sleep_millis_lower, self.retry_initial_sleep_millis_upper
                ),
            ));
        }
        if self.retry_initial_sleep_millis_upper > self.retry_max_sleep_millis {
            return Err(constraint(
                CONFIG_RETRY_INITIAL_SLEEP_MILLIS_UPPER,
                format!(
                    "{} exceeds {CONFIG_RETRY_MAX_SLEEP_MILLIS} {}",
                    self.retry_initial_sleep_millis_upper, self.retry_max_sleep_millis
                ),
            ));
        }
        for (key, size) in [
            (CONFIG_MAX_INCREMENTAL_INDEX_SIZE, self.max_incremental_index_size),
            (CONFIG_MAX_SERIALIZED_INDEX_SIZE, self.max_serialized_index_size),
        ] {
            if size == 0 {
                return Err(constraint(key, "must be at least 1"));
            }
            if size >= hard_object_size_limit {
                return Err(constraint(
                    key,
                    format!(
                        "{size} does not fit below the backend object size limit {hard_object_size_limit}"
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn with_repository_id(mut self, repository_id: impl Into<String>) -> Self {
        self.repository_id = repository_id.into();
        self
    }

    pub fn with_parents_per_commit(mut self, parents_per_commit: usize) -> Self {
        self.parents_per_commit = parents_per_commit;
        self
    }

    pub fn with_commit_timeout_millis(mut self, millis: u64) -> Self {
        self.commit_timeout_millis = millis;
        self
    }

    pub fn with_commit_retries(mut self, retries: u32) -> Self {
        self.commit_retries = retries;
        self
    }

    pub fn with_retry_initial_sleep_millis_lower(mut self, millis: u64) -> Self {
        self.retry_initial_sleep_millis_lower = millis;
        self
    }

    pub fn with_retry_initial_sleep_millis_upper(mut self, millis: u64) -> Self {
        self.retry_initial_sleep_millis_upper = millis;
        self
    }

    pub fn with_retry_max_sleep_millis(mut self, millis: u64) -> Self {
        self.retry_max_sleep_millis = millis;
        self
    }

    pub fn with_max_incremental_index_size(mut self, size: usize) -> Self {
        self.max_incremental_index_size = size;
        self
    }

    pub fn with_max_serialized_index_size(mut self, size: usize) -> Self {
        self.max_serialized_index_size = size;
        self
    }

    pub fn with_max_reference_stripes_per_commit(mut self, stripes: usize) -> Self {
        self.max_reference_stripes_per_commit = stripes;
        self
    }

    pub fn with_assumed_wall_clock_drift_micros(mut self, micros: u64) -> Self {
        self.assumed_wall_clock_drift_micros = micros;
        self
    }

    pub fn with_validate_namespaces(mut self, validate: bool) -> Self {
        self.validate_namespaces = validate;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Microseconds since the UNIX epoch, read from the injected clock.
    pub fn current_time_micros(&self) -> u64 {
        self.clock.now_micros()
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_millis)
    }

    /// Whether the retry count is unbounded and only the timeout applies.
    pub fn retries_unbounded(&self) -> bool {
        self.commit_retries == u32::MAX
    }

    /// Fresh backoff state for one commit operation.
    pub fn backoff(&self) -> RetryBackoff {
        RetryBackoff::new(
            self.retry_initial_sleep_millis_lower,
            self.retry_initial_sleep_millis_upper,
            self.retry_max_sleep_millis,
        )
    }
}

fn parse_value<T>(key: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> ConfigResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected 'true' or 'false'".into(),
        }),
    }
}

fn constraint(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Constraint {
        key,
        reason: reason.into(),
    }
}
