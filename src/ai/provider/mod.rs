//! Summarization Provider Abstraction
//!
//! Defines the [`SummaryProvider`] trait implemented by every summarizer, from
//! the metered premium API down to the local extractive fallback.
//!
//! ## Modules
//!
//! - `chain`: Ordered fallback chain with tagged attempt outcomes
//! - `circuit_breaker`: Circuit breaker pattern for provider resilience
//! - `retry`: Bounded retry around breaker-guarded calls

mod chain;
mod circuit_breaker;
mod extractive;
mod huggingface;
mod openai;
mod retry;

pub use chain::{
    AttemptOutcome, ChainTier, Decision, FallbackChain, FallbackChainBuilder, SkipReason, decide,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
pub use extractive::ExtractiveProvider;
pub use huggingface::HuggingFaceProvider;
pub use openai::OpenAiProvider;
pub use retry::RetryPolicy;

// Re-export error types from centralized location
pub use crate::types::{ErrorCategory, ErrorClassifier, ProviderError};

use std::sync::Arc;

use async_trait::async_trait;

use crate::ai::quota::UsageDelta;

/// Summarization provider
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    /// Provider name recorded as provenance (`provider_name`)
    fn name(&self) -> &str;

    /// Provider version recorded as provenance, usually the model id
    fn version(&self) -> &str;

    /// Produce a summary for `text`
    async fn summarize(&self, text: &str) -> Result<String, ProviderError>;

    /// Metered usage one call for `text` is expected to consume.
    ///
    /// `None` for providers that are not metered.
    fn usage_estimate(&self, _text: &str) -> Option<UsageDelta> {
        None
    }
}

/// Shared provider type for concurrent access across batch items.
pub type SharedProvider = Arc<dyn SummaryProvider>;

/// Build the HTTP client shared by the remote providers
pub(crate) fn http_client(timeout: std::time::Duration) -> crate::types::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(std::time::Duration::from_secs(
            crate::constants::provider::CONNECTION_TIMEOUT_SECS,
        ))
        .build()
        .map_err(crate::types::GistError::Http)
}
