//! Bounded retry around breaker-guarded calls
//!
//! Only retryable categories (timeout, network, 5xx, rate limit) are retried.
//! Breaker rejections, auth failures, bad requests and quota refusals return
//! immediately so the fallback chain can move on.

use std::future::Future;
use std::time::Duration;

use backon::{ConstantBuilder, ExponentialBuilder, Retryable};

use crate::config::{BackoffKind, RetryConfig};
use crate::constants::retry as retry_constants;
use crate::types::ProviderError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_secs(config.max_delay_secs),
            jitter: config.jitter,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    fn retries(&self) -> usize {
        self.max_attempts.saturating_sub(1) as usize
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Returns the last error.
    pub async fn run<T, F, Fut>(&self, provider: &str, op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let notify = |err: &ProviderError, delay: Duration| {
            tracing::debug!(
                provider,
                category = %err.category,
                error = %err.message,
                delay_ms = delay.as_millis() as u64,
                hint_ms = err.recommended_delay().as_millis() as u64,
                "Retrying provider call"
            );
        };

        match self.backoff {
            BackoffKind::Exponential => {
                let mut builder = ExponentialBuilder::default()
                    .with_min_delay(self.base_delay)
                    .with_max_delay(self.max_delay)
                    .with_factor(retry_constants::BACKOFF_FACTOR)
                    .with_max_times(self.retries());
                if self.jitter {
                    builder = builder.with_jitter();
                }
                op.retry(builder)
                    .when(ProviderError::is_retryable)
                    .notify(notify)
                    .await
            }
            BackoffKind::Fixed => {
                let mut builder = ConstantBuilder::default()
                    .with_delay(self.base_delay)
                    .with_max_times(self.retries());
                if self.jitter {
                    builder = builder.with_jitter();
                }
                op.retry(builder)
                    .when(ProviderError::is_retryable)
                    .notify(notify)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorCategory;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: BackoffKind::Exponential,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter: false,
        }
    }

    fn err(category: ErrorCategory) -> ProviderError {
        ProviderError::with_provider(category, "boom", "test")
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(err(ErrorCategory::Transient))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(2)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(err(ErrorCategory::Network))
            })
            .await;

        assert_eq!(result.unwrap_err().category, ErrorCategory::Network);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_categories_return_immediately() {
        for category in [
            ErrorCategory::Auth,
            ErrorCategory::BadRequest,
            ErrorCategory::BreakerOpen,
            ErrorCategory::QuotaExceeded,
        ] {
            let calls = AtomicU32::new(0);
            let result: Result<(), _> = policy(5)
                .run("test", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(err(category))
                })
                .await;

            assert_eq!(result.unwrap_err().category, category);
            assert_eq!(calls.load(Ordering::SeqCst), 1, "{category} was retried");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_backoff() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            backoff: BackoffKind::Fixed,
            ..policy(3)
        };
        let result: Result<(), _> = policy
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(err(ErrorCategory::Timeout))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_from_config_clamps_attempts() {
        let policy = RetryPolicy::from_config(&RetryConfig::with_attempts(0));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(RetryPolicy::none().retries(), 0);
    }
}
