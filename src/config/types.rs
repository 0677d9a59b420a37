//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/newsgist/) and project (.newsgist/) level configuration.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{batch, cache, circuit_breaker, provider, quota, retry};
use crate::types::{GistError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Provider selection and batching
    pub summarizer: SummarizerConfig,

    /// Metered premium provider (OpenAI-compatible)
    pub premium: PremiumConfig,

    /// Hosted secondary provider (Hugging Face Inference)
    pub secondary: SecondaryConfig,

    /// Usage caps for the premium provider
    pub quota: QuotaConfig,

    /// Cache and usage backing stores
    pub storage: StorageConfig,
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `GistError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.summarizer.batch_size == 0 {
            return Err(GistError::Config(
                "summarizer.batch_size must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.premium.temperature) {
            return Err(GistError::Config(format!(
                "premium.temperature must be between 0.0 and 2.0, got {}",
                self.premium.temperature
            )));
        }

        if self.premium.timeout_secs == 0 || self.secondary.timeout_secs == 0 {
            return Err(GistError::Config(
                "provider timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.premium.max_tokens_per_request == 0 {
            return Err(GistError::Config(
                "premium.max_tokens_per_request must be greater than 0".to_string(),
            ));
        }

        if self.premium.usd_per_1k_tokens < 0.0 || self.quota.max_usd_per_run < 0.0 {
            return Err(GistError::Config(
                "monetary values must not be negative".to_string(),
            ));
        }

        self.premium.retry.validate("premium")?;
        self.secondary.retry.validate("secondary")?;
        self.premium.breaker.validate("premium")?;
        self.secondary.breaker.validate("secondary")?;

        let needs_redis = self.storage.cache_backend == CacheBackend::Redis
            || self.quota.backend == QuotaBackend::Redis;
        if needs_redis && self.storage.redis_url.as_deref().is_none_or(str::is_empty) {
            return Err(GistError::Config(
                "storage.redis_url is required for the redis backend".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Summarizer Configuration
// =============================================================================

/// Which providers the fallback chain may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMode {
    /// Local extractive only
    #[default]
    Local,
    /// Hosted secondary, then local
    #[serde(alias = "free")]
    Secondary,
    /// Metered premium, then secondary, then local
    #[serde(alias = "openai")]
    Premium,
}

impl std::fmt::Display for SummaryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummaryMode::Local => write!(f, "local"),
            SummaryMode::Secondary => write!(f, "secondary"),
            SummaryMode::Premium => write!(f, "premium"),
        }
    }
}

impl std::str::FromStr for SummaryMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(SummaryMode::Local),
            "secondary" | "free" => Ok(SummaryMode::Secondary),
            "premium" | "openai" => Ok(SummaryMode::Premium),
            _ => Err(format!(
                "Unknown summary mode: {}. Valid values: local, secondary, premium",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub mode: SummaryMode,

    /// Records dispatched concurrently per batch
    pub batch_size: usize,

    /// Lifetime of cached summaries
    pub cache_ttl_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            mode: SummaryMode::default(),
            batch_size: batch::DEFAULT_BATCH_SIZE,
            cache_ttl_secs: cache::DEFAULT_TTL_SECS,
        }
    }
}

// =============================================================================
// Resilience Configuration
// =============================================================================

/// Delay growth between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first call
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
    pub jitter: bool,
}

impl RetryConfig {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(GistError::Config(format!(
                "{section}.retry.max_attempts must be greater than 0"
            )));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: retry::SECONDARY_MAX_ATTEMPTS,
            backoff: BackoffKind::default(),
            base_delay_ms: retry::BASE_DELAY_MS,
            max_delay_secs: retry::MAX_DELAY_SECS,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failure percentage that opens the circuit
    pub error_threshold_pct: u8,
    /// Minimum outcomes in the window before evaluating
    pub volume_threshold: u32,
    pub rolling_window_secs: u64,
    pub reset_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_pct: circuit_breaker::ERROR_THRESHOLD_PCT,
            volume_threshold: circuit_breaker::VOLUME_THRESHOLD,
            rolling_window_secs: circuit_breaker::ROLLING_WINDOW_SECS,
            reset_timeout_secs: circuit_breaker::RESET_TIMEOUT_SECS,
        }
    }
}

impl BreakerConfig {
    fn validate(&self, section: &str) -> Result<()> {
        if self.error_threshold_pct > 100 {
            return Err(GistError::Config(format!(
                "{section}.breaker.error_threshold_pct must be at most 100, got {}",
                self.error_threshold_pct
            )));
        }
        if self.volume_threshold == 0 || self.rolling_window_secs == 0 {
            return Err(GistError::Config(format!(
                "{section}.breaker volume_threshold and rolling_window_secs must be greater than 0"
            )));
        }
        if self.reset_timeout_secs == 0 {
            return Err(GistError::Config(format!(
                "{section}.breaker.reset_timeout_secs must be greater than 0"
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Provider Configuration
// =============================================================================

/// Premium provider settings.
///
/// API keys are never serialized and are redacted in Debug output.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PremiumConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_output_tokens: u32,
    pub max_tokens_per_request: usize,
    pub temperature: f32,
    pub usd_per_1k_tokens: f64,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
}

impl std::fmt::Debug for PremiumConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PremiumConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("max_tokens_per_request", &self.max_tokens_per_request)
            .field("temperature", &self.temperature)
            .field("usd_per_1k_tokens", &self.usd_per_1k_tokens)
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .finish()
    }
}

impl Default for PremiumConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            timeout_secs: provider::PREMIUM_TIMEOUT_SECS,
            max_output_tokens: 200,
            max_tokens_per_request: 1024,
            temperature: 0.2,
            usd_per_1k_tokens: 0.002,
            retry: RetryConfig::with_attempts(retry::PREMIUM_MAX_ATTEMPTS),
            breaker: BreakerConfig::default(),
        }
    }
}

impl PremiumConfig {
    /// Configured key, falling back to `OPENAI_API_KEY`
    pub fn resolved_api_key(&self) -> Option<SecretString> {
        resolve_key(self.api_key.as_deref(), "OPENAI_API_KEY")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Secondary provider settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondaryConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Upper bound on generated summary length
    pub max_length: u32,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
}

impl std::fmt::Debug for SecondaryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_length", &self.max_length)
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .finish()
    }
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api-inference.huggingface.co/models".to_string(),
            model: "facebook/bart-large-cnn".to_string(),
            timeout_secs: provider::SECONDARY_TIMEOUT_SECS,
            max_length: 150,
            retry: RetryConfig::with_attempts(retry::SECONDARY_MAX_ATTEMPTS),
            breaker: BreakerConfig::default(),
        }
    }
}

impl SecondaryConfig {
    /// Configured key, falling back to `HF_TOKEN`
    pub fn resolved_api_key(&self) -> Option<SecretString> {
        resolve_key(self.api_key.as_deref(), "HF_TOKEN")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn resolve_key(configured: Option<&str>, env_var: &str) -> Option<SecretString> {
    configured
        .map(str::to_string)
        .or_else(|| std::env::var(env_var).ok())
        .filter(|k| !k.trim().is_empty())
        .map(SecretString::from)
}

// =============================================================================
// Quota Configuration
// =============================================================================

/// Where premium usage totals live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuotaBackend {
    /// In-process, atomic
    #[default]
    Memory,
    /// Shared database file, atomic across processes
    Sqlite,
    /// Redis Lua script, atomic across hosts
    Redis,
    /// Plain get/set over the cache backend, best-effort
    Kv,
}

impl std::fmt::Display for QuotaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaBackend::Memory => write!(f, "memory"),
            QuotaBackend::Sqlite => write!(f, "sqlite"),
            QuotaBackend::Redis => write!(f, "redis"),
            QuotaBackend::Kv => write!(f, "kv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// 0 = unlimited
    pub max_tokens_per_run: u64,
    /// 0 = unlimited
    pub max_requests_per_run: u64,
    /// 0 = unlimited
    pub max_usd_per_run: f64,
    pub backend: QuotaBackend,
    /// Storage key for usage totals
    pub usage_key: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_run: quota::DEFAULT_MAX_TOKENS_PER_RUN,
            max_requests_per_run: quota::DEFAULT_MAX_REQUESTS_PER_RUN,
            max_usd_per_run: 0.0,
            backend: QuotaBackend::default(),
            usage_key: quota::DEFAULT_USAGE_KEY.to_string(),
        }
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    /// One JSON file per key
    #[default]
    File,
    Sqlite,
    Redis,
}

impl std::fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheBackend::Memory => write!(f, "memory"),
            CacheBackend::File => write!(f, "file"),
            CacheBackend::Sqlite => write!(f, "sqlite"),
            CacheBackend::Redis => write!(f, "redis"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub cache_backend: CacheBackend,
    pub cache_dir: PathBuf,
    pub database_path: PathBuf,
    pub redis_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_backend: CacheBackend::default(),
            cache_dir: PathBuf::from(".newsgist/cache"),
            database_path: PathBuf::from(".newsgist/newsgist.db"),
            redis_url: None,
        }
    }
}
