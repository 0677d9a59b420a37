//! Unified Error Type System
//!
//! Centralized error types for the entire application.
//! Provides error classification for retry and fallback decisions.
//!
//! ## Error Categories
//!
//! - **Transient / Network / Timeout / RateLimit**: may resolve (retry)
//! - **Auth**: credentials rejected (disable provider for the run)
//! - **BreakerOpen**: circuit open (fall through immediately)
//! - **QuotaExceeded**: usage governor rejected the call (fall through, not a failure)
//!
//! Per-item provider failures never leave the fallback chain. `GistError`
//! is reserved for configuration and infrastructure failures.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Error categories used for retry and fallthrough decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limited by the provider - wait then retry
    RateLimit,
    /// Authentication failed - never retry, disable provider
    Auth,
    /// Network/connectivity issues - retry with backoff
    Network,
    /// Call exceeded its hard timeout - retry
    Timeout,
    /// 5xx-equivalent server issue - retry
    Transient,
    /// Invalid request - don't retry
    BadRequest,
    /// Provider response could not be understood
    ParseError,
    /// Circuit breaker rejected the call without contacting the provider
    BreakerOpen,
    /// Usage governor refused to admit the call
    QuotaExceeded,
    /// Unknown error - not retried
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::Auth => write!(f, "AUTH"),
            Self::Network => write!(f, "NETWORK"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Transient => write!(f, "TRANSIENT"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::ParseError => write!(f, "PARSE_ERROR"),
            Self::BreakerOpen => write!(f, "BREAKER_OPEN"),
            Self::QuotaExceeded => write!(f, "QUOTA_EXCEEDED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorCategory {
    /// Check if this category is retryable on the same provider
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Timeout | Self::Transient
        )
    }

    /// Whether the outcome says something about provider health.
    ///
    /// Breaker rejections and quota refusals happen before the provider is
    /// contacted and must not feed the breaker's rolling window.
    pub fn counts_against_provider(&self) -> bool {
        !matches!(self, Self::BreakerOpen | Self::QuotaExceeded)
    }

    /// Get recommended retry delay for this category
    pub fn recommended_delay(&self) -> Duration {
        match self {
            Self::RateLimit => Duration::from_secs(30),
            Self::Network => Duration::from_secs(5),
            Self::Timeout | Self::Transient => Duration::from_secs(2),
            _ => Duration::from_millis(500),
        }
    }
}

// =============================================================================
// Provider Error
// =============================================================================

/// Structured provider error with category, context, and retry hints
#[derive(Debug, Clone)]
pub struct ProviderError {
    /// Error category for routing decisions
    pub category: ErrorCategory,
    /// Detailed error message
    pub message: String,
    /// Provider that produced the error
    pub provider: Option<String>,
    /// Suggested wait time before retry (if applicable)
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{}:{}] {}", provider, self.category, self.message)
        } else {
            write!(f, "[{}] {}", self.category, self.message)
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            provider: None,
            retry_after: None,
        }
    }

    pub fn with_provider(
        category: ErrorCategory,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            provider: Some(provider.into()),
            retry_after: None,
        }
    }

    /// Add provider context to existing error
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Add suggested retry delay
    pub fn retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn breaker_open(provider: impl Into<String>) -> Self {
        Self::with_provider(ErrorCategory::BreakerOpen, "circuit breaker is open", provider)
    }

    pub fn timeout(provider: impl Into<String>, after: Duration) -> Self {
        Self::with_provider(
            ErrorCategory::Timeout,
            format!("call timed out after {after:?}"),
            provider,
        )
    }

    pub fn quota_exceeded(provider: impl Into<String>) -> Self {
        Self::with_provider(
            ErrorCategory::QuotaExceeded,
            "usage caps would be exceeded",
            provider,
        )
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }

    pub fn is_breaker_open(&self) -> bool {
        self.category == ErrorCategory::BreakerOpen
    }

    pub fn is_auth(&self) -> bool {
        self.category == ErrorCategory::Auth
    }

    /// Get recommended retry delay
    pub fn recommended_delay(&self) -> Duration {
        self.retry_after
            .unwrap_or_else(|| self.category.recommended_delay())
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps raw provider failures onto error categories
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from any provider
    pub fn classify(message: &str, provider: &str) -> ProviderError {
        let lower = message.to_lowercase();

        if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
        {
            return ProviderError::with_provider(ErrorCategory::RateLimit, message, provider)
                .retry_after(Duration::from_secs(30));
        }

        if lower.contains("401")
            || lower.contains("403")
            || lower.contains("api key")
            || lower.contains("unauthorized")
            || lower.contains("invalid token")
        {
            return ProviderError::with_provider(ErrorCategory::Auth, message, provider);
        }

        if lower.contains("timeout") || lower.contains("timed out") {
            return ProviderError::with_provider(ErrorCategory::Timeout, message, provider);
        }

        if lower.contains("connection")
            || lower.contains("network")
            || lower.contains("dns")
            || lower.contains("unreachable")
        {
            return ProviderError::with_provider(ErrorCategory::Network, message, provider)
                .retry_after(Duration::from_secs(5));
        }

        if lower.contains("503")
            || lower.contains("502")
            || lower.contains("500")
            || lower.contains("service unavailable")
            || lower.contains("overloaded")
            || lower.contains("currently loading")
        {
            return ProviderError::with_provider(ErrorCategory::Transient, message, provider)
                .retry_after(Duration::from_secs(2));
        }

        if lower.contains("400") || lower.contains("bad request") {
            return ProviderError::with_provider(ErrorCategory::BadRequest, message, provider);
        }

        if lower.contains("parse") || lower.contains("json") || lower.contains("response format")
        {
            return ProviderError::with_provider(ErrorCategory::ParseError, message, provider);
        }

        ProviderError::with_provider(ErrorCategory::Unknown, message, provider)
    }

    /// Classify HTTP status code directly (more accurate than string matching)
    pub fn classify_http_status(status: u16, message: &str, provider: &str) -> ProviderError {
        match status {
            429 => ProviderError::with_provider(ErrorCategory::RateLimit, message, provider)
                .retry_after(Duration::from_secs(30)),
            401 | 403 => ProviderError::with_provider(ErrorCategory::Auth, message, provider),
            400 | 404 | 413 | 422 => {
                ProviderError::with_provider(ErrorCategory::BadRequest, message, provider)
            }
            408 => ProviderError::with_provider(ErrorCategory::Timeout, message, provider),
            500..=599 => ProviderError::with_provider(ErrorCategory::Transient, message, provider)
                .retry_after(Duration::from_secs(5)),
            _ => ProviderError::with_provider(ErrorCategory::Unknown, message, provider),
        }
    }

    /// Classify a transport error from the HTTP client
    pub fn classify_reqwest(err: &reqwest::Error, provider: &str) -> ProviderError {
        if err.is_timeout() {
            ProviderError::with_provider(ErrorCategory::Timeout, err.to_string(), provider)
        } else if err.is_connect() || err.is_request() {
            ProviderError::with_provider(ErrorCategory::Network, err.to_string(), provider)
        } else if err.is_decode() {
            ProviderError::with_provider(ErrorCategory::ParseError, err.to_string(), provider)
        } else if let Some(status) = err.status() {
            Self::classify_http_status(status.as_u16(), &err.to_string(), provider)
        } else {
            Self::classify(&err.to_string(), provider)
        }
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum GistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<ProviderError> for GistError {
    fn from(err: ProviderError) -> Self {
        GistError::Provider(err)
    }
}

pub type Result<T> = std::result::Result<T, GistError>;

impl GistError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Add context using a closure (lazy evaluation)
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| GistError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| GistError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
