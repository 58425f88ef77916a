//! Bounded retry of remote calls driven by [`classify`].

use std::future::Future;

use catbatch_types::{RetryPolicy, ServiceError};

use crate::errors::{classify, Disposition};

/// Final result of a retried call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Succeeded(T),
    /// The service reported the entity as not found.
    Skipped(ServiceError),
    /// Every attempt failed with a transient error; holds the last one.
    Exhausted(ServiceError),
    /// A permanent error ended the call.
    Failed(ServiceError),
}

impl<T> Attempt<T> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// The terminal error, if the call did not succeed.
    #[must_use]
    pub fn error(&self) -> Option<&ServiceError> {
        match self {
            Self::Succeeded(_) => None,
            Self::Skipped(e) | Self::Exhausted(e) | Self::Failed(e) => Some(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryReport<T> {
    pub outcome: Attempt<T>,
    /// Calls made, including the first.
    pub attempts: u32,
}

/// Run `op` until it succeeds, hits a non-retryable error, or the policy's
/// attempt bound is reached.
///
/// `op` receives the 1-based attempt number. Retryable failures sleep for the
/// policy's fixed delay before the next attempt.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> RetryReport<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match op(attempt).await {
            Ok(value) => {
                return RetryReport {
                    outcome: Attempt::Succeeded(value),
                    attempts: attempt,
                }
            }
            Err(err) => err,
        };

        let outcome = match classify(&err) {
            Disposition::Skip => Attempt::Skipped(err),
            Disposition::Fail => Attempt::Failed(err),
            Disposition::Retry if policy.allows_retry_after(attempt) => {
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = policy.delay.as_millis() as u64;
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms,
                    kind = %err.kind,
                    code = %err.code,
                    "Retryable error, will retry"
                );
                tokio::time::sleep(policy.delay).await;
                continue;
            }
            Disposition::Retry => {
                tracing::error!(
                    operation = label,
                    attempts = attempt,
                    kind = %err.kind,
                    code = %err.code,
                    "Max attempts exhausted"
                );
                Attempt::Exhausted(err)
            }
        };
        return RetryReport {
            outcome,
            attempts: attempt,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_every_time_exhausts_bound() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let report: RetryReport<()> = with_retry(&policy(3), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ServiceError::throttled("Throttling", "slow down")) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.attempts, 3);
        assert!(matches!(report.outcome, Attempt::Exhausted(_)));
        // Two sleeps between three attempts.
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_transient_reports_attempts() {
        let report = with_retry(&policy(5), "test", |attempt| async move {
            if attempt < 3 {
                Err(ServiceError::timeout("Timeout", "deadline"))
            } else {
                Ok(attempt * 10)
            }
        })
        .await;
        assert_eq!(report.outcome, Attempt::Succeeded(30));
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let calls = AtomicU32::new(0);
        let report: RetryReport<()> = with_retry(&policy(3), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ServiceError::not_found("EntityNotFound", "gone")) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(report.outcome, Attempt::Skipped(_)));
        assert!(report.outcome.error().is_some_and(ServiceError::is_not_found));
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let report: RetryReport<()> = with_retry(&policy(3), "test", |_| async {
            Err(ServiceError::access_denied("AccessDenied", "no"))
        })
        .await;
        assert_eq!(report.attempts, 1);
        assert!(matches!(report.outcome, Attempt::Failed(_)));
    }

    #[tokio::test]
    async fn single_attempt_policy_exhausts_immediately() {
        let report: RetryReport<()> = with_retry(&RetryPolicy::no_retry(), "test", |_| async {
            Err(ServiceError::unavailable("Unavailable", "down"))
        })
        .await;
        assert_eq!(report.attempts, 1);
        assert!(matches!(report.outcome, Attempt::Exhausted(_)));
    }
}
