//! Configuration for the vstore commit engine.
//!
//! [`StoreConfig`] holds the retry, backoff and index-size tunables. It is a
//! plain value with `with_*` adjusters and a key→string loading surface whose
//! key names are the `CONFIG_*` constants. Time is read through an injected
//! [`Clock`] so commit timing can be driven by a [`ManualClock`] in tests.

pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;

pub use backoff::RetryBackoff;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::*;
pub use error::{ConfigError, ConfigResult};
