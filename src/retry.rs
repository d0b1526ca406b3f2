//! Bounded retry with jittered backoff
//!
//! Wraps transaction submission (mint, approve, vault deposit) and state
//! writes. Every loop here is bounded; once attempts are exhausted the last
//! error is handed back exactly as the operation produced it.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Lower bound of the random sleep between attempts
    pub min_delay: Duration,
    /// Upper bound of the random sleep between attempts
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Short schedule for local state writes.
    pub fn for_store() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(1),
        }
    }

    /// Pick a sleep uniformly inside `[min_delay, max_delay]`.
    pub fn jittered_delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Classifies errors for retry decisions
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// RPC timeout, dropped connection, rate limit
    Transient,
    /// The same request will fail again (revert, bad signature, no funds)
    Permanent,
    /// Anything else; retried
    Unknown,
}

/// Classify an error message for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("execution reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("invalid parameters")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}

/// Run `operation` until it succeeds or the policy is exhausted.
///
/// `operation` receives the 1-based attempt number. Each error is classified
/// on its own: a [`ErrorClass::Permanent`] one is returned on the spot, any
/// other is retried until `max_attempts` calls have been made. The attempt
/// bound holds either way.
pub async fn with_retry<F, T, E, Fut>(policy: &RetryPolicy, what: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(what, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                let error_str = e.to_string();
                if classify_error(&error_str) == ErrorClass::Permanent {
                    warn!(what, attempt, error = %error_str, "Permanent error, not retrying");
                    return Err(e);
                }
                if !policy.should_retry(attempt) {
                    warn!(what, attempt, error = %error_str, "Retries exhausted");
                    return Err(e);
                }
                let backoff = policy.jittered_delay();
                warn!(
                    what,
                    attempt,
                    max = policy.max_attempts,
                    ?backoff,
                    error = %error_str,
                    "Retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let d = policy.jittered_delay();
            assert!(d >= Duration::from_secs(5) && d <= Duration::from_secs(20));
        }
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_error("connection reset by peer"), ErrorClass::Transient);
        assert_eq!(classify_error("HTTP 429 Too Many Requests"), ErrorClass::Transient);
        assert_eq!(classify_error("execution reverted: paused"), ErrorClass::Permanent);
        assert_eq!(classify_error("insufficient funds for gas * price + value"), ErrorClass::Permanent);
        assert_eq!(classify_error("something odd"), ErrorClass::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_makes_exactly_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_retry(&RetryPolicy::default(), "mint", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("connection refused on attempt {attempt}")) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err(), "connection refused on attempt 3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_retry(&RetryPolicy::default(), "approve", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 1 {
                    Err("timeout".to_string())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_retry(&RetryPolicy::default(), "deposit", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("execution reverted".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_run_to_the_attempt_bound() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_retry(&RetryPolicy::default(), "mint", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err("request timed out".to_string())
                } else {
                    Err("execution reverted: nonce too low".to_string())
                }
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err(), "execution reverted: nonce too low");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_between_attempts_only() {
        let start = tokio::time::Instant::now();
        let _: Result<(), String> = with_retry(&RetryPolicy::default(), "mint", |_| async {
            Err("network unreachable".to_string())
        })
        .await;
        let elapsed = start.elapsed();
        // two sleeps of 5..=20s each
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed <= Duration::from_secs(40));
    }
}
