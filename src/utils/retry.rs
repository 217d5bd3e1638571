//! Bounded retry with exponential backoff.

use std::{fmt::Display, future::Future, time::Duration};

use log::warn;

use crate::{config::RetrySettings, error::Retryable};

/// Backoff before attempt `attempt + 1`: `base * 2^attempt`, capped at `max_delay_ms`.
pub fn backoff_delay(policy: &RetrySettings, attempt: u32) -> Duration {
    let factor = 2_u64.saturating_pow(attempt);
    let delay = policy.base_delay_ms.saturating_mul(factor).min(policy.max_delay_ms);
    Duration::from_millis(delay)
}

/// Run `op` until it succeeds, returns a non-retryable error, or the policy's
/// attempts are exhausted. The last error is returned.
pub async fn with_retry<T, E, F, Fut>(policy: &RetrySettings, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts || !e.is_retryable() {
                    return Err(e);
                }

                let delay = backoff_delay(policy, attempt - 1);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    label, attempt, max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChainError, StoreError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetrySettings {
        RetrySettings {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetrySettings {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        assert_eq!(backoff_delay(&policy, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(400));
        assert_eq!(backoff_delay(&policy, 8), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(&policy, 200), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, ChainError> = with_retry(&policy(3), "head", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ChainError::Unavailable("timeout".into()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), ChainError> = with_retry(&policy(2), "head", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ChainError::Unavailable("down".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), StoreError> = with_retry(&policy(5), "get", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::NotFound(7))
        })
        .await;

        assert_eq!(result, Err(StoreError::NotFound(7)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
