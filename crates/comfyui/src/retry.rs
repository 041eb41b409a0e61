//! Bounded exponential-backoff retry for backend start-up waits.
//!
//! The backend process may still be booting when a job arrives, so both
//! the readiness check and the socket connect are retried. Every loop is
//! bounded by [`RetryPolicy::max_attempts`]; exhausting it yields
//! [`RetryError::Exhausted`] instead of spinning forever.

use std::future::Future;
use std::time::Duration;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Total attempts before giving up (at least one is always made).
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_attempts: 60,
        }
    }
}

impl RetryPolicy {
    /// A constant-delay policy.
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            max_attempts,
        }
    }
}

/// Calculate the next backoff delay from the current delay and policy.
///
/// The result is clamped to [`RetryPolicy::max_delay`].
pub fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a transient error.
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with an error that retrying cannot fix.
    Fatal(E),
}

/// Run `op` until it succeeds, fails fatally, or the attempt budget is
/// spent. `is_transient` decides which errors are worth another attempt.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
    is_transient: impl Fn(&E) -> bool,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(label, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !is_transient(&e) => return Err(RetryError::Fatal(e)),
            Err(e) => {
                if attempt >= max_attempts {
                    tracing::warn!(label, attempt, error = %e, "Giving up");
                    return Err(RetryError::Exhausted { attempts: attempt, last: e });
                }
                tracing::debug!(
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying",
                );
            }
        }

        tokio::time::sleep(delay).await;
        delay = next_delay(delay, policy);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn next_delay_doubles() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(30),
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(1), &policy);
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(8), &policy);
        assert_eq!(d, Duration::from_secs(10));
    }

    #[test]
    fn fixed_policy_never_grows() {
        let policy = RetryPolicy::fixed(Duration::from_secs(1), 5);
        assert_eq!(next_delay(Duration::from_secs(1), &policy), Duration::from_secs(1));
    }

    #[test]
    fn full_backoff_sequence() {
        let policy = RetryPolicy::default();
        let mut delay = policy.initial_delay;
        let expected = [250, 500, 1000, 2000, 2000, 2000];

        for &expected_ms in &expected {
            assert_eq!(delay.as_millis() as u64, expected_ms);
            delay = next_delay(delay, &policy);
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::fixed(Duration::from_millis(10), 5);

        let result: Result<u32, RetryError<String>> = retry_with_backoff(
            &policy,
            "test",
            move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("not yet ({n})"))
                } else {
                    Ok(n)
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn exhausts_attempt_budget() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::fixed(Duration::from_millis(10), 4);

        let result: Result<(), RetryError<String>> = retry_with_backoff(
            &policy,
            "test",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            },
            |_| true,
        )
        .await;

        assert_matches!(result, Err(RetryError::Exhausted { attempts: 4, .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fatal_error_stops_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::fixed(Duration::from_millis(10), 10);

        let result: Result<(), RetryError<String>> = retry_with_backoff(
            &policy,
            "test",
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("bad request".to_string())
            },
            |e| e != "bad request",
        )
        .await;

        assert_matches!(result, Err(RetryError::Fatal(e)) if e == "bad request");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
