//! Retry loop for outbound provider calls, exponential backoff with jitter.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// What a failed outbound call tells the retry loop. Transport hiccups and
/// throttling are worth another attempt; a 4xx from the provider is not.
#[derive(Debug)]
pub struct CallFailure {
    pub retryable: bool,
    pub reason: String,
}

impl CallFailure {
    pub fn permanent(reason: impl Into<String>) -> Self {
        CallFailure {
            retryable: false,
            reason: reason.into(),
        }
    }

    pub fn from_transport(err: &reqwest::Error) -> Self {
        CallFailure {
            retryable: err.is_timeout() || err.is_connect(),
            reason: err.to_string(),
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let retryable =
            status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
        let snippet: String = body.chars().take(200).collect();
        CallFailure {
            retryable,
            reason: format!("HTTP {status}: {snippet}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retry attempts after the initial one.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub add_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn quick() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;

        let mut duration = Duration::from_millis(backoff_ms);

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = (backoff_ms as f64 * 0.25 * rand_jitter()) as u64;
            duration += Duration::from_millis(jitter);
        }

        duration
    }
}

/// Pseudo-random jitter in 0.0..1.0 without an extra dependency.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Run an outbound call, retrying retryable failures with backoff.
pub async fn retry_call<F, Fut, T>(
    policy: &RetryPolicy,
    operation: &str,
    f: F,
) -> Result<T, CallFailure>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, CallFailure>>,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        operation,
                        attempt = attempt + 1,
                        "Outbound call succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(failure) => {
                if !failure.retryable {
                    warn!(
                        operation,
                        reason = %failure.reason,
                        "Outbound call failed with permanent error, not retrying"
                    );
                    return Err(failure);
                }
                if attempt >= policy.max_retries {
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        reason = %failure.reason,
                        "Outbound call failed after max retries"
                    );
                    return Err(failure);
                }

                let backoff = policy.backoff_duration(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    reason = %failure.reason,
                    backoff_ms = backoff.as_millis() as u64,
                    "Outbound call failed, retrying after backoff"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(200));
    }

    #[test]
    fn test_backoff_duration() {
        let policy = RetryPolicy {
            add_jitter: false,
            initial_backoff: Duration::from_millis(100),
            ..Default::default()
        };

        assert_eq!(policy.backoff_duration(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let policy = RetryPolicy {
            add_jitter: false,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            ..Default::default()
        };
        assert_eq!(policy.backoff_duration(5), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let policy = RetryPolicy::default();
        let result = retry_call(&policy, "test_op", || async { Ok::<_, CallFailure>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let policy = RetryPolicy::quick();
        let calls = AtomicU32::new(0);
        let result = retry_call(&policy, "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(CallFailure::permanent("bad request")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_retried_until_success() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            add_jitter: false,
        };
        let calls = AtomicU32::new(0);
        let result = retry_call(&policy, "test_op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CallFailure {
                        retryable: true,
                        reason: "flaky".into(),
                    })
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
