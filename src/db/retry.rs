//! Retry with exponential backoff for SQLite lock contention.
//!
//! The database file is shared with writers outside this process. When one of
//! them holds a conflicting lock, SQLite reports `SQLITE_BUSY`/`SQLITE_LOCKED`
//! once the busy timeout elapses. Those errors are retried; any other error is
//! returned immediately.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay before the first retry. Doubles for every following retry.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Result of an operation run under [`LockRetryPolicy::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The operation succeeded on some attempt.
    Completed(T),
    /// Every attempt hit lock contention.
    Exhausted { attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn completed_or(self, fallback: T) -> T {
        match self {
            RetryOutcome::Completed(value) => value,
            RetryOutcome::Exhausted { .. } => fallback,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl LockRetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after `attempt` (1-indexed) failed with lock contention.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Runs `operation` until it succeeds, fails with a non-lock error, or the
    /// attempts are used up. `operation` receives the attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<RetryOutcome<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for attempt in 1..=self.max_attempts {
            match operation(attempt).await {
                Ok(value) => return Ok(RetryOutcome::Completed(value)),
                Err(e) if e.is_lock_contention() => {
                    if attempt == self.max_attempts {
                        break;
                    }
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        "Database locked during {} (attempt {}/{}), retrying in {:?}",
                        label,
                        attempt,
                        self.max_attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!("Database error during {}: {}", label, e);
                    return Err(e);
                }
            }
        }

        tracing::warn!(
            "Database still locked after {} attempts, giving up on {}",
            self.max_attempts,
            label
        );
        Ok(RetryOutcome::Exhausted {
            attempts: self.max_attempts,
        })
    }
}
