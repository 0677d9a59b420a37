//! newsgist - Resilient Summarization Governor
//!
//! Summarizes news-style article records through a chain of providers of
//! differing cost and reliability while keeping remote usage safe:
//!
//! - **Summary Cache**: content-addressed TTL cache over pluggable stores
//! - **Usage Governor**: token, request and dollar caps with atomic and
//!   best-effort consistency tiers
//! - **Circuit Breakers**: rolling-window breakers around each remote provider
//! - **Fallback Chain**: premium → secondary → local extractive, which always
//!   produces a summary
//! - **Batch Orchestrator**: bounded concurrent fan-out with cancellation
//!
//! ## Quick Start
//!
//! ```ignore
//! use newsgist::{ArticleRecord, BatchOrchestrator, FallbackChain, SummarizeOptions};
//! use newsgist::config::SummaryMode;
//!
//! let chain = FallbackChain::builder(SummaryMode::Local).build();
//! let orchestrator = BatchOrchestrator::new(Arc::new(chain));
//! let records = vec![ArticleRecord::new("btc", "Rally").with_text("Bitcoin rallied.")];
//! let results = orchestrator.summarize(&records, SummarizeOptions::default()).await;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: Providers, fallback chain, breakers, retry, usage governor, metrics
//! - [`summary`]: Summary cache and batch orchestration
//! - [`storage`]: Key-value backends and the SQLite database
//! - [`config`]: Layered configuration

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod storage;
pub mod summary;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader, SummaryMode};

// Types
pub use types::{ArticleRecord, SummaryResult};

// Error Types
pub use types::error::{ErrorCategory, GistError, ProviderError, Result, ResultExt};

// Storage
pub use storage::{Backends, Database, KvNamespace, KvStore, SharedDatabase, SharedKvStore};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use summary::{
    BatchOrchestrator, CacheEntry, CacheKey, RunOutcome, SummarizeOptions, SummaryCache,
};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    // Chain
    FallbackChain,
    // Metrics
    MetricEvent,
    MetricsCollector,
    MetricsSink,
    SharedMetrics,
    // Providers
    SummaryProvider,
    // Quota
    UsageCaps,
    UsageGovernor,
};
