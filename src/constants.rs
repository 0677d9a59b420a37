//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Batch orchestration constants
pub mod batch {
    /// Default number of records dispatched concurrently per batch
    pub const DEFAULT_BATCH_SIZE: usize = 5;
}

/// Retry policy constants
pub mod retry {
    /// Attempts for the metered premium provider (each attempt costs money)
    pub const PREMIUM_MAX_ATTEMPTS: u32 = 2;

    /// Attempts for the secondary hosted provider
    pub const SECONDARY_MAX_ATTEMPTS: u32 = 3;

    /// Base delay for backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 500;

    /// Maximum delay between retries (seconds)
    pub const MAX_DELAY_SECS: u64 = 10;

    /// Backoff multiplier
    pub const BACKOFF_FACTOR: f32 = 2.0;
}

/// Circuit breaker constants
pub mod circuit_breaker {
    /// Failure percentage within the rolling window that opens the circuit
    pub const ERROR_THRESHOLD_PCT: u8 = 50;

    /// Minimum outcomes in the window before the error rate is evaluated
    pub const VOLUME_THRESHOLD: u32 = 5;

    /// Rolling window length (seconds)
    pub const ROLLING_WINDOW_SECS: u64 = 10;

    /// Duration to wait before attempting recovery (seconds)
    pub const RESET_TIMEOUT_SECS: u64 = 30;
}

/// Usage quota constants
pub mod quota {
    /// Default token cap per run for the metered provider
    pub const DEFAULT_MAX_TOKENS_PER_RUN: u64 = 100_000;

    /// Default request cap per run for the metered provider
    pub const DEFAULT_MAX_REQUESTS_PER_RUN: u64 = 50;

    /// Key under which usage totals are stored
    pub const DEFAULT_USAGE_KEY: &str = "openai-usage-v1";

    /// Attempts for the best-effort (get/set) reservation loop
    pub const BEST_EFFORT_MAX_RETRIES: u32 = 5;

    /// Linear backoff step between best-effort attempts (milliseconds)
    pub const BEST_EFFORT_BACKOFF_MS: u64 = 100;

    /// Upper bound on a single reservation round-trip (seconds)
    pub const RESERVE_TIMEOUT_SECS: u64 = 10;

    /// Warning threshold (fraction of any cap)
    pub const WARNING_THRESHOLD: f64 = 0.75;

    /// Critical threshold (fraction of any cap)
    pub const CRITICAL_THRESHOLD: f64 = 0.90;

    /// Micro-dollars per dollar
    pub const MICROS_PER_USD: f64 = 1_000_000.0;
}

/// Summary cache constants
pub mod cache {
    /// Cache entry lifetime (seconds)
    pub const DEFAULT_TTL_SECS: u64 = 86_400;
}

/// Provider constants
pub mod provider {
    /// Rough characters-per-token ratio used for estimates and truncation
    pub const CHARS_PER_TOKEN: usize = 4;

    /// Sentences kept by the extractive summarizer
    pub const EXTRACTIVE_MAX_SENTENCES: usize = 3;

    /// Premium provider request timeout (seconds)
    pub const PREMIUM_TIMEOUT_SECS: u64 = 30;

    /// Secondary provider request timeout (seconds)
    pub const SECONDARY_TIMEOUT_SECS: u64 = 20;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 10;
}
