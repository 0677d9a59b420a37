//! Provider Governance Layer
//!
//! Summarization providers and the machinery that governs access to them:
//! circuit breakers, retries, the usage governor and metric events.

pub mod metrics;
pub mod provider;
pub mod quota;
pub mod timeout;

pub use metrics::{
    LatencySummary, MetricEvent, MetricsCollector, MetricsSink, MetricsSnapshot, NoopMetrics,
    SharedMetrics, create_shared_metrics,
};
pub use provider::{
    AttemptOutcome, ChainTier, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats,
    CircuitState, Decision, ExtractiveProvider, FallbackChain, FallbackChainBuilder,
    HuggingFaceProvider, OpenAiProvider, RetryPolicy, SharedProvider, SkipReason,
    SummaryProvider, decide,
};
pub use quota::{
    ConsistencyTier, KvQuotaStore, LocalQuotaStore, QuotaStore, RedisQuotaStore, SharedGovernor,
    SharedQuotaStore, SqliteQuotaStore, UsageCaps, UsageDelta, UsageGovernor, UsageState,
    estimate_tokens,
};
pub use timeout::{with_provider_timeout, with_timeout};
