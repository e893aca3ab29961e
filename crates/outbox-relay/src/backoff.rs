//! Retry delay for failed deliveries.

use chrono::{DateTime, Duration, Utc};
use outbox_database::latest_timestamp;

/// Floor for the configured base delay.
pub const MIN_RETRY_DELAY_MS: u64 = 1_000;

/// Attempt count at which the delay stops growing.
pub const MAX_BACKOFF_MULTIPLIER: u32 = 10;

/// Linear backoff capped at `MAX_BACKOFF_MULTIPLIER` times the base delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_delay_ms: u64,
}

impl BackoffPolicy {
    pub fn new(retry_delay_ms: u64) -> Self {
        Self {
            base_delay_ms: retry_delay_ms.max(MIN_RETRY_DELAY_MS),
        }
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    /// Delay before the next attempt, given the attempts made so far.
    pub fn delay(&self, attempts: u32) -> Duration {
        let multiplier = u64::from(attempts.min(MAX_BACKOFF_MULTIPLIER));
        let millis = self.base_delay_ms.saturating_mul(multiplier);
        Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
    }

    /// When an event that just failed for the `attempts`-th time becomes due.
    pub fn next_available_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        offset_from(now, self.delay(attempts))
    }
}

/// `now + delay`, capped at the latest instant the outbox can store.
pub fn offset_from(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now.checked_add_signed(delay)
        .map_or_else(latest_timestamp, |at| at.min(latest_timestamp()))
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(relay_config_and_utils::DEFAULT_RETRY_DELAY_MS)
    }
}
