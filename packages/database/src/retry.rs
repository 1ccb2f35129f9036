//! Retry helpers for transient store errors.
//!
//! Persistence calls made by the ingestion workers go through
//! [`RetryPolicy::run`] so write conflicts between concurrent sessions and
//! momentary file lock failures are retried with exponential backoff
//! instead of failing the record.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Default number of retries after the first attempt.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry. Doubles on each attempt
/// (100ms, 200ms, 400ms).
const DEFAULT_BASE_DELAY_MS: u64 = 100;

/// Largest shift applied to the base delay.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Exponential backoff settings for transient store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << shift))
    }

    /// Runs `op`, retrying on transient errors.
    ///
    /// Blocks the calling thread while backing off, so call it from a
    /// blocking task.
    ///
    /// # Errors
    ///
    /// Returns the last error if `op` fails with a non-transient error or
    /// keeps failing after all retries.
    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut attempt = 0;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    log::warn!(
                        "  transient store error: {e}; retry {attempt}/{} in {delay:?}...",
                        self.max_retries
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 0,
        }
    }

    #[test]
    fn delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn retries_transient_until_success() {
        let calls = Cell::new(0);
        let result = fast(3).run(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(StoreError::Io(std::io::Error::other("locked")))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast(2).run(|| {
            calls.set(calls.get() + 1);
            Err(StoreError::Io(std::io::Error::other("locked")))
        });

        assert!(matches!(result, Err(StoreError::Io(_))));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast(5).run(|| {
            calls.set(calls.get() + 1);
            Err(StoreError::NotFound { id: 1 })
        });

        assert!(matches!(result, Err(StoreError::NotFound { id: 1 })));
        assert_eq!(calls.get(), 1);
    }
}
