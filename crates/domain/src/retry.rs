//! Bounded retry with exponential back-off, optionally followed by a single
//! fallback attempt.
//!
//! Used uniformly by the structured-generation path, the embedding path and
//! critical-path store writes. Callers choose which errors are worth another
//! attempt through a predicate (usually [`Error::is_transient`]).

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::trace::TraceEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            multiplier: cfg.multiplier,
        }
    }

    /// A policy that tries exactly once.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Same back-off, different attempt budget.
    pub fn with_attempts(&self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self.clone()
        }
    }

    /// Delay before retry number `attempt` (1-based: the wait after the
    /// first failure is `delay_for(1)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, the predicate rejects the error, or the
/// attempt budget is spent. `op` receives the 1-based attempt number.
pub async fn retry<T, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt >= policy.max_attempts || !is_retryable(&e) {
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                TraceEvent::RetryAttempt {
                    operation: operation.to_owned(),
                    attempt,
                    max_attempts: policy.max_attempts,
                    delay_ms: delay.as_millis() as u64,
                    error: e.to_string(),
                }
                .emit();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

/// [`retry`] the primary operation; if it exhausts its budget on a
/// retryable error, make exactly one `fallback` attempt.
///
/// Non-retryable errors from the primary path are returned as-is: the
/// fallback would hit the same wall.
pub async fn retry_with_fallback<T, F, Fut, G, GFut, P>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: P,
    primary: F,
    fallback: G,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    G: FnOnce() -> GFut,
    GFut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    match retry(policy, operation, &is_retryable, primary).await {
        Ok(value) => Ok(value),
        Err(e) if is_retryable(&e) => {
            TraceEvent::Fallback {
                operation: operation.to_owned(),
                reason: e.to_string(),
            }
            .emit();
            fallback().await
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 2.0,
        }
    }

    #[test]
    fn delay_progression_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out = retry(&fast(3), "test", Error::is_transient, move |_| async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Timeout("slow".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_permanent_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = retry(&fast(5), "test", Error::is_transient, move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::ContractViolation("bad".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_runs_once_after_exhaustion() {
        let counter = AtomicU32::new(0);
        let primary_calls = &counter;
        let out = retry_with_fallback(
            &fast(2),
            "test",
            Error::is_transient,
            move |_| async move {
                primary_calls.fetch_add(1, Ordering::SeqCst);
                Err::<&str, _>(Error::Http("503".into()))
            },
            || async { Ok("fallback") },
        )
        .await
        .unwrap();
        assert_eq!(out, "fallback");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fallback_skipped_for_permanent_error() {
        let err = retry_with_fallback(
            &fast(2),
            "test",
            Error::is_transient,
            |_| async { Err::<&str, _>(Error::Auth("401".into())) },
            || async { Ok("fallback") },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }
}
