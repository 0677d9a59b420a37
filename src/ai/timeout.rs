//! Hard Timeouts
//!
//! Helpers for bounding async operations. Remote provider calls use
//! [`with_provider_timeout`], whose expiry is a retryable [`ProviderError`];
//! infrastructure work (store connections) uses [`with_timeout`].
//!
//! ## Usage
//!
//! ```ignore
//! let conn = with_timeout(
//!     Duration::from_secs(10),
//!     redis_store::connect(url),
//!     "redis connect",
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::types::{GistError, ProviderError, Result};

/// Execute an async operation with a timeout
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(GistError::timeout(operation_name, timeout)),
    }
}

/// Execute a provider call with a hard timeout.
///
/// Expiry is reported as a `Timeout` provider error so it counts as a
/// failure and stays retryable.
pub async fn with_provider_timeout<T, F>(
    timeout: Duration,
    future: F,
    provider: &str,
) -> std::result::Result<T, ProviderError>
where
    F: Future<Output = std::result::Result<T, ProviderError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::timeout(provider, timeout)),
    }
}
