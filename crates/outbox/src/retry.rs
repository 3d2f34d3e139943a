//! Bounded retry with linearly scaled backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Retry policy applied to each event publish.
///
/// Backoff scales linearly with the attempt number: `base_delay * attempt`
/// (50ms, 100ms, 150ms with the defaults). The wait runs after every failed
/// attempt, including the last one, so three attempts produce the full
/// delay sequence before the terminal outcome surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempt budget (not "retries after the first"). Values below 1
    /// are treated as 1: an operation always gets one attempt.
    pub max_attempts: u32,
    /// Delay unit scaled by the attempt number.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// What happened after the attempt budget was spent.
///
/// Failures are captured, not propagated: the caller decides whether a
/// terminal error is recorded, logged, or escalated.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { error: E, attempts: u32 },
    /// Cancellation was observed during a backoff wait. No further attempts
    /// were made; the operation's target should be left untouched for a
    /// later run.
    Cancelled,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Backoff delay after the given (1-indexed) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Run `operation` under this policy.
    ///
    /// The backoff wait is non-blocking and raced against `cancel`, so a
    /// shutdown in mid-backoff abandons the operation instead of finishing
    /// the wait.
    pub async fn run<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let budget = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    return RetryOutcome::Succeeded {
                        value,
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    let delay = self.delay_for_attempt(attempt);
                    tokio::select! {
                        _ = cancel.cancelled() => return RetryOutcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if attempt >= budget {
                        return RetryOutcome::Exhausted {
                            error,
                            attempts: attempt,
                        };
                    }
                }
            }
        }
    }
}
