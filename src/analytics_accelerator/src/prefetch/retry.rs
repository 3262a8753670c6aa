//! Retry loop for transport calls.
//!
//! Transient errors are retried with exponential backoff up to the attempt
//! ceiling; permanent errors return at once.

use std::future::Future;

use tracing::warn;

use crate::config::RetryConfig;
use crate::transport::{TransportError, TransportResult};

/// Run `operation` until it succeeds, fails permanently, or runs out of attempts.
///
/// Returns the final result together with the number of attempts made.
pub(crate) async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    key: &str,
    mut operation: F,
) -> (TransportResult<T>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TransportResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error: TransportError = match operation().await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) => e,
        };

        if !error.is_transient() {
            warn!(
                operation = operation_name,
                key,
                attempt,
                error = %error,
                "non-retryable error"
            );
            return (Err(error), attempt);
        }
        if attempt >= max_attempts {
            warn!(
                operation = operation_name,
                key,
                attempt,
                error = %error,
                "retry ceiling reached"
            );
            return (Err(error), attempt);
        }

        let backoff = config.backoff_duration(attempt - 1);
        warn!(
            operation = operation_name,
            key,
            attempt,
            error = %error,
            backoff_ms = backoff.as_millis() as u64,
            "retryable error, backing off"
        );
        tokio::time::sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryConfig {
        RetryConfig::default().with_backoff_ms(1, 2)
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_errors() {
        let calls = AtomicU32::new(0);
        let (result, attempts) = with_retry(&fast_retry(), "fetch", "k", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TransportError::timeout("slow"))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let (result, attempts) = with_retry(&fast_retry(), "fetch", "k", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TransportError::AccessDenied {
                key: "k".to_string(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ceiling_returns_last_error() {
        let (result, attempts) = with_retry(&fast_retry().with_max_attempts(2), "fetch", "k", || async {
            Err::<(), _>(TransportError::throttled("slow down"))
        })
        .await;
        assert_eq!(result, Err(TransportError::throttled("slow down")));
        assert_eq!(attempts, 2);
    }
}
