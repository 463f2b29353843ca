//! Bounded exponential backoff.
//!
//! Delay for attempt `n` (1-based) is `base * multiplier^(n-1)`, jittered
//! upward by at most `jitter`, capped at `max_delay_ms`. Only errors that
//! report themselves transient are retried.
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ReportError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Jitter factor (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Fast policy without jitter, for tests and local collaborators.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ReportError::config("retry max_attempts must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ReportError::config("retry jitter must be within 0.0..=1.0"));
        }
        if self.multiplier < 1.0 {
            return Err(ReportError::config("retry multiplier must be >= 1.0"));
        }
        Ok(())
    }

    /// Delay to sleep after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.base_delay_ms);
        let delay = base.mul_f64(self.multiplier.powi(attempt.saturating_sub(1) as i32));
        let jittered = if self.jitter > 0.0 {
            delay.mul_f64(1.0 + fastrand::f64() * self.jitter)
        } else {
            delay
        };
        jittered.min(Duration::from_millis(self.max_delay_ms))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// Returns the result together with the number of attempts made.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> (Result<T>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return (Ok(value), attempt),
                Err(err) if err.is_transient() && attempt < max => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = %operation,
                        attempt = attempt,
                        max_attempts = max,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(operation = %operation, attempt = attempt, error = %err, "giving up");
                    return (Err(err), attempt);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 350,
            multiplier: 2.0,
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(300));
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let (result, attempts) = RetryPolicy::immediate(3)
            .run("flaky", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ReportError::fetch("api", FetchErrorKind::ServerError, "503"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let (result, attempts) = RetryPolicy::immediate(5)
            .run("auth", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ReportError::fetch("api", FetchErrorKind::Auth, "401")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_bounded() {
        let (result, attempts) = RetryPolicy::immediate(3)
            .run("down", |_| async {
                Err::<(), _>(ReportError::fetch("api", FetchErrorKind::Timeout, "timed out"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }
}
