//! Randomized exponential backoff between commit attempts.

use std::time::Duration;

use rand::Rng;

/// Sleep bounds for the next retry, in milliseconds.
///
/// Each [`next_sleep`](Self::next_sleep) draws uniformly from
/// `[lower, upper]` and then doubles both bounds, each clamped to `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryBackoff {
    lower: u64,
    upper: u64,
    max: u64,
}

impl RetryBackoff {
    pub fn new(lower_millis: u64, upper_millis: u64, max_millis: u64) -> Self {
        Self {
            lower: lower_millis.min(max_millis),
            upper: upper_millis.max(lower_millis).min(max_millis),
            max: max_millis,
        }
    }

    /// Current `(lower, upper)` bounds in milliseconds.
    pub fn bounds(&self) -> (u64, u64) {
        (self.lower, self.upper)
    }

    /// Draw the next sleep and widen the bounds for the one after.
    pub fn next_sleep<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let millis = if self.lower >= self.upper {
            self.lower
        } else {
            rng.gen_range(self.lower..=self.upper)
        };
        self.lower = self.lower.saturating_mul(2).min(self.max);
        self.upper = self.upper.saturating_mul(2).min(self.max);
        Duration::from_millis(millis)
    }
}
