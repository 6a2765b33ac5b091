//! # Receive Backoff
//!
//! Exponential backoff with jitter applied between failed receive calls.
//!
//! The poll loop retries a failed receive immediately unless a policy is
//! configured. With a policy, consecutive failures wait `initial * multiplier^n`
//! (capped at `max_delay`) before the next receive; a successful receive resets
//! the counter.

use crate::error::ValidationError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff policy for consecutive receive failures
///
/// # Examples
///
/// ```rust
/// use sqs_poller::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(Duration::from_millis(500), Duration::from_secs(5), 2.0)
///     .without_jitter();
///
/// assert_eq!(policy.calculate_delay(0), Duration::from_millis(500));
/// assert_eq!(policy.calculate_delay(1), Duration::from_secs(1));
/// assert_eq!(policy.calculate_delay(10), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay after the first failure
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Exponential growth factor (typically 2.0)
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays
    pub use_jitter: bool,

    /// Jitter range as a fraction of the delay (0.25 = ±25%)
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
            jitter_percent: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy with jitter enabled
    pub fn new(initial_delay: Duration, max_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier,
            ..Self::default()
        }
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Set custom jitter percentage (0.0 to 1.0)
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Delay before the retry following the `attempt`-th consecutive failure (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        let capped_delay_secs = base_delay_secs.min(self.max_delay.as_secs_f64());

        let final_delay_secs = if self.use_jitter {
            Self::add_jitter(capped_delay_secs, self.jitter_percent)
        } else {
            capped_delay_secs
        };

        Duration::try_from_secs_f64(final_delay_secs).unwrap_or(self.max_delay)
    }

    /// Reject values that cannot produce a meaningful delay
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ValidationError::OutOfRange {
                field: "backoff_multiplier".to_string(),
                message: format!("must be a finite value of at least 1.0, got {}", self.backoff_multiplier),
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_percent) {
            return Err(ValidationError::OutOfRange {
                field: "jitter_percent".to_string(),
                message: format!("must be 0.0-1.0, got {}", self.jitter_percent),
            });
        }

        if self.initial_delay > self.max_delay {
            return Err(ValidationError::OutOfRange {
                field: "initial_delay".to_string(),
                message: "must not exceed max_delay".to_string(),
            });
        }

        Ok(())
    }

    /// Applies random variation in range [delay * (1-jitter), delay * (1+jitter)]
    fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
        let jitter_range = delay_secs * jitter_percent.clamp(0.0, 1.0);
        // Also rules out NaN and infinity, which gen_range rejects
        if !(jitter_range > 0.0 && jitter_range.is_finite()) {
            return delay_secs;
        }

        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        (delay_secs + jitter).max(0.0)
    }
}

/// Serialize durations as integer milliseconds in configuration files
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
