//! Attempt-bounded retries for single-file transfers

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use drive_core::ProviderError;

use crate::error::{Result, SyncError};

/// How often and how patiently a failed transfer is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_delay,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Run `operation` until it succeeds, fails permanently or runs out of
    /// attempts. Waiting between attempts ends early on cancellation.
    pub async fn run<F, Fut, T>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut backoff = self.backoff();
        let mut attempt = 1;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_retryable() {
                debug!(error = %error, "Permanent transfer error");
                return Err(error.into());
            }
            if attempt >= self.max_attempts {
                warn!(attempts = attempt, error = %error, "Giving up after retries");
                return Err(error.into());
            }

            let mut delay = backoff.next_backoff().unwrap_or(self.max_delay);
            if let Some(secs) = error.retry_after() {
                delay = delay.max(Duration::from_secs(secs));
            }
            warn!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "Retrying transfer");

            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let result = fast(3)
            .run(&CancellationToken::new(), move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Transient("flaky".into()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = fast(3)
            .run(&CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Transient("down".into()))
            })
            .await;

        assert!(matches!(result, Err(SyncError::Provider(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = fast(5)
            .run(&CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::NotFound("gone".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
        };

        let result: Result<()> = policy
            .run(&cancel, || async { Err(ProviderError::Transient("down".into())) })
            .await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }
}
