//! Bounded retry for stages that touch the network.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PipelineResult;

/// Retry policy for a single operation.
///
/// The delay before attempt `n + 1` is `delay * n` (linear backoff). The default makes three
/// attempts with no delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Base delay between attempts, in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 0,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    fn delay_before(&self, next_attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms.saturating_mul(u64::from(next_attempt - 1)))
    }

    /// Run `op` until it succeeds, returns a non-transient error, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. On exhaustion the last error is returned
    /// together with the number of attempts made.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> Result<T, (crate::PipelineError, u32)>
    where
        F: FnMut(u32) -> PipelineResult<T>,
    {
        let max = self.attempts();
        let mut attempt = 1;
        loop {
            debug!(attempt, max_attempts = max, "{what}: attempt {attempt}/{max}");
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max => {
                    let delay = self.delay_before(attempt + 1);
                    warn!(
                        attempt,
                        max_attempts = max,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "{what}: attempt failed, retrying"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err((err, attempt)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RetryPolicy;
    use crate::PipelineError;

    fn transient() -> PipelineError {
        PipelineError::Extract {
            key: "k".to_string(),
            message: "connection reset".to_string(),
        }
    }

    #[test]
    fn stops_after_max_attempts() {
        let mut calls = 0;
        let res: Result<(), _> = RetryPolicy::default().run("op", |_| {
            calls += 1;
            Err(transient())
        });
        let (_, attempts) = res.unwrap_err();
        assert_eq!(calls, 3);
        assert_eq!(attempts, 3);
    }

    #[test]
    fn returns_first_success() {
        let mut calls = 0;
        let res = RetryPolicy::default().run("op", |attempt| {
            calls += 1;
            if attempt < 2 { Err(transient()) } else { Ok(attempt) }
        });
        assert_eq!(res.unwrap(), 2);
        assert_eq!(calls, 2);
    }

    #[test]
    fn non_transient_errors_are_not_retried() {
        let mut calls = 0;
        let res: Result<(), _> = RetryPolicy::default().run("op", |_| {
            calls += 1;
            Err(PipelineError::NotFound {
                key: "data/x.parquet".to_string(),
            })
        });
        let (err, attempts) = res.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
        assert_eq!(attempts, 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            delay_ms: 0,
        };
        let mut calls = 0;
        let _: Result<(), _> = policy.run("op", |_| {
            calls += 1;
            Err(transient())
        });
        assert_eq!(calls, 1);
    }
}
