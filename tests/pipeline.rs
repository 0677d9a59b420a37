//! End-to-end runs of the orchestrator and fallback chain with scripted
//! providers. No network access.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use newsgist::ai::metrics::{MetricEvent, MetricsCollector};
use newsgist::ai::provider::{
    CircuitBreakerConfig, CircuitState, ErrorCategory, ProviderError, RetryPolicy,
    SummaryProvider,
};
use newsgist::ai::quota::{
    ConsistencyTier, QuotaStore, SqliteQuotaStore, UsageCaps, UsageDelta, UsageGovernor,
    UsageState,
};
use newsgist::storage::{Database, FileStore, MemoryStore};
use newsgist::{
    ArticleRecord, BatchOrchestrator, CacheEntry, CacheKey, FallbackChain, SummarizeOptions,
    SummaryCache, SummaryMode,
};

// =============================================================================
// Scripted providers
// =============================================================================

enum Script {
    Succeed,
    Fail(ErrorCategory),
}

struct ScriptedProvider {
    name: &'static str,
    script: Script,
    calls: AtomicUsize,
    cancel_on_call: Option<CancellationToken>,
}

impl ScriptedProvider {
    fn new(name: &'static str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name,
            script,
            calls: AtomicUsize::new(0),
            cancel_on_call: None,
        })
    }

    fn cancelling(name: &'static str, token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Script::Succeed,
            calls: AtomicUsize::new(0),
            cancel_on_call: Some(token),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SummaryProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn version(&self) -> &str {
        "test-1"
    }

    async fn summarize(&self, text: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        match self.script {
            Script::Succeed => Ok(format!("{} says: {}", self.name, text)),
            Script::Fail(category) => Err(ProviderError::new(category, "scripted failure")),
        }
    }

    fn usage_estimate(&self, _text: &str) -> Option<UsageDelta> {
        Some(UsageDelta::new(100, 1, 0.0002))
    }
}

/// Quota store whose every operation fails
struct UnreachableQuotaStore;

#[async_trait]
impl QuotaStore for UnreachableQuotaStore {
    fn tier(&self) -> ConsistencyTier {
        ConsistencyTier::Atomic
    }

    fn backend(&self) -> &'static str {
        "unreachable"
    }

    async fn try_reserve(
        &self,
        _delta: &UsageDelta,
        _caps: &UsageCaps,
    ) -> newsgist::Result<Option<UsageState>> {
        Err(newsgist::GistError::storage("connection refused"))
    }

    async fn usage(&self) -> newsgist::Result<UsageState> {
        Err(newsgist::GistError::storage("connection refused"))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn records(n: usize) -> Vec<ArticleRecord> {
    (0..n)
        .map(|i| {
            ArticleRecord::new("eth", format!("Headline {i}"))
                .with_text(format!("Story {i} opened higher. Traders watched closely."))
        })
        .collect()
}

fn file_cache(dir: &TempDir) -> SummaryCache {
    SummaryCache::with_default_ttl(Arc::new(FileStore::new(dir.path().join("cache"))))
}

fn memory_cache() -> SummaryCache {
    SummaryCache::with_default_ttl(Arc::new(MemoryStore::new()))
}

fn options(batch_size: usize) -> SummarizeOptions {
    SummarizeOptions::default().with_batch_size(batch_size)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn local_mode_summarizes_and_caches() {
    let dir = TempDir::new().unwrap();
    let cache = file_cache(&dir);
    let chain = FallbackChain::builder(SummaryMode::Local)
        .cache(cache.clone())
        .build();
    let orchestrator = BatchOrchestrator::new(Arc::new(chain));

    let input: Vec<ArticleRecord> = serde_json::from_str(
        r#"[{"asset":"btc","title":"Rally","text":"Bitcoin rallied. Volume surged. Analysts cautious."}]"#,
    )
    .unwrap();

    let results = orchestrator.summarize(&input, SummarizeOptions::default()).await;

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.provider_name, "local-extractive");
    assert!(!result.from_cache);
    assert_eq!(
        result.summary,
        "Analysts cautious. Bitcoin rallied. Volume surged."
    );

    let entry = cache
        .lookup(&CacheKey::new("btc", "Rally"))
        .await
        .expect("cache entry for (btc, Rally)");
    assert_eq!(entry.summary, result.summary);
    assert_eq!(entry.provider_name, "local-extractive");
}

#[tokio::test]
async fn second_run_is_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let secondary = ScriptedProvider::new("hf", Script::Succeed);
    let chain = FallbackChain::builder(SummaryMode::Secondary)
        .secondary(
            secondary.clone(),
            CircuitBreakerConfig::default(),
            RetryPolicy::none(),
        )
        .cache(file_cache(&dir))
        .build();
    let orchestrator = BatchOrchestrator::new(Arc::new(chain));
    let input = records(4);

    let first = orchestrator.summarize(&input, options(2)).await;
    assert_eq!(secondary.calls(), 4);
    assert!(first.iter().all(|r| !r.from_cache && r.provider_name == "hf"));

    let second = orchestrator.summarize(&input, options(2)).await;
    assert_eq!(secondary.calls(), 4, "no remote calls on a warm cache");
    assert!(second.iter().all(|r| r.from_cache));

    for result in &second {
        let original = first
            .iter()
            .find(|r| r.record.title == result.record.title)
            .unwrap();
        assert_eq!(original.summary, result.summary);
        assert_eq!(original.provider_name, result.provider_name);
    }
}

#[tokio::test]
async fn expired_entry_is_recomputed() {
    let cache = memory_cache();
    let secondary = ScriptedProvider::new("hf", Script::Succeed);
    let chain = FallbackChain::builder(SummaryMode::Secondary)
        .secondary(
            secondary.clone(),
            CircuitBreakerConfig::default(),
            RetryPolicy::none(),
        )
        .cache(cache.clone())
        .build();
    let orchestrator = BatchOrchestrator::new(Arc::new(chain));
    let input = records(1);

    let mut stale = CacheEntry::new("old summary", "hf", "test-1", Duration::from_secs(60));
    stale.cached_at = Utc::now() - chrono::Duration::hours(1);
    cache.store(&CacheKey::for_record(&input[0]), &stale).await;

    let results = orchestrator.summarize(&input, SummarizeOptions::default()).await;
    assert_eq!(secondary.calls(), 1);
    assert!(!results[0].from_cache);
    assert_ne!(results[0].summary, "old summary");
}

#[tokio::test]
async fn same_asset_and_title_reuses_earlier_summary() {
    let cache = memory_cache();
    let chain = FallbackChain::builder(SummaryMode::Local)
        .cache(cache)
        .build();
    let orchestrator = BatchOrchestrator::new(Arc::new(chain));

    let original = ArticleRecord::new("btc", "Rally").with_text("Bitcoin rallied sharply today.");
    let revised = ArticleRecord::new("btc", "Rally").with_text("Completely different body text.");

    let first = orchestrator.summarize(&[original], SummarizeOptions::default()).await;
    let second = orchestrator.summarize(&[revised.clone()], SummarizeOptions::default()).await;

    assert!(second[0].from_cache);
    assert_eq!(second[0].summary, first[0].summary);
    assert_eq!(second[0].record, revised);
}

#[tokio::test]
async fn failing_remotes_always_terminate_locally() {
    let premium = ScriptedProvider::new("openai", Script::Fail(ErrorCategory::Auth));
    let secondary = ScriptedProvider::new("hf", Script::Fail(ErrorCategory::Network));
    let metrics = Arc::new(MetricsCollector::new("termination"));
    let chain = FallbackChain::builder(SummaryMode::Premium)
        .premium(premium.clone(), CircuitBreakerConfig::default(), RetryPolicy::none())
        .secondary(secondary.clone(), CircuitBreakerConfig::default(), RetryPolicy::none())
        .metrics(metrics.clone())
        .build();
    let orchestrator = BatchOrchestrator::new(Arc::new(chain));

    let results = orchestrator.summarize(&records(10), options(3)).await;

    assert_eq!(results.len(), 10);
    assert!(
        results
            .iter()
            .all(|r| r.provider_name == "local-extractive" && !r.summary.is_empty())
    );
    // Auth failure disables premium after the first batch reaches it
    assert!(premium.calls() <= 3);
    assert_eq!(
        metrics.count(MetricEvent::SummaryProduced, Some("local-extractive")),
        10
    );
}

#[tokio::test]
async fn open_breaker_fails_fast() {
    let secondary = ScriptedProvider::new("hf", Script::Fail(ErrorCategory::Transient));
    let breaker = CircuitBreakerConfig {
        error_threshold_pct: 50,
        volume_threshold: 2,
        rolling_window: Duration::from_secs(60),
        reset_timeout: Duration::from_secs(300),
        call_timeout: Duration::from_secs(5),
    };
    let chain = FallbackChain::builder(SummaryMode::Secondary)
        .secondary(secondary.clone(), breaker, RetryPolicy::none())
        .build();
    let chain = Arc::new(chain);
    let orchestrator = BatchOrchestrator::new(Arc::clone(&chain));

    let results = orchestrator.summarize(&records(6), options(1)).await;

    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|r| r.provider_name == "local-extractive"));
    assert_eq!(secondary.calls(), 2, "provider not invoked once the circuit opens");

    let stats = chain.breaker_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].state, CircuitState::Open);
    assert_eq!(stats[0].blocked_count, 4);
}

#[tokio::test]
async fn unreachable_governor_skips_premium() {
    let premium = ScriptedProvider::new("openai", Script::Succeed);
    let secondary = ScriptedProvider::new("hf", Script::Succeed);
    let metrics = Arc::new(MetricsCollector::new("fail-closed"));
    let chain = FallbackChain::builder(SummaryMode::Premium)
        .premium(premium.clone(), CircuitBreakerConfig::default(), RetryPolicy::none())
        .secondary(secondary.clone(), CircuitBreakerConfig::default(), RetryPolicy::none())
        .governor(Arc::new(UsageGovernor::new(Arc::new(UnreachableQuotaStore))))
        .metrics(metrics.clone())
        .build();
    let orchestrator = BatchOrchestrator::new(Arc::new(chain));

    let results = orchestrator.summarize(&records(3), SummarizeOptions::default()).await;

    assert_eq!(premium.calls(), 0);
    assert_eq!(secondary.calls(), 3);
    assert!(results.iter().all(|r| r.provider_name == "hf"));
    assert_eq!(metrics.count(MetricEvent::QuotaRejected, Some("openai")), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_quota_caps_premium_requests() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::open(dir.path().join("usage.db")).unwrap());
    let store = Arc::new(SqliteQuotaStore::new(db, "openai-usage-v1"));
    let governor = Arc::new(UsageGovernor::new(store));

    let premium = ScriptedProvider::new("openai", Script::Succeed);
    let chain = FallbackChain::builder(SummaryMode::Premium)
        .premium(premium.clone(), CircuitBreakerConfig::default(), RetryPolicy::none())
        .governor(governor.clone())
        .caps(UsageCaps {
            max_requests_per_run: 3,
            ..UsageCaps::unlimited()
        })
        .build();
    let orchestrator = BatchOrchestrator::new(Arc::new(chain));

    let results = orchestrator.summarize(&records(8), options(8)).await;

    assert_eq!(results.len(), 8);
    assert_eq!(premium.calls(), 3);
    assert_eq!(
        results.iter().filter(|r| r.provider_name == "openai").count(),
        3
    );
    assert_eq!(
        results
            .iter()
            .filter(|r| r.provider_name == "local-extractive")
            .count(),
        5
    );

    let usage = governor.usage().await;
    assert_eq!(usage.requests_made, 3);
    assert_eq!(usage.tokens_used, 300);
}

#[tokio::test]
async fn cancellation_drains_current_batch() {
    let cancel = CancellationToken::new();
    let secondary = ScriptedProvider::cancelling("hf", cancel.clone());
    let chain = FallbackChain::builder(SummaryMode::Secondary)
        .secondary(secondary.clone(), CircuitBreakerConfig::default(), RetryPolicy::none())
        .cache(memory_cache())
        .build();
    let orchestrator = BatchOrchestrator::new(Arc::new(chain));
    let input = records(6);

    let outcome = orchestrator
        .summarize_with_cancel(&input, options(2), &cancel)
        .await;

    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.pending.len(), 4);
    assert_eq!(secondary.calls(), 2);

    let mut seen: Vec<String> = outcome
        .results
        .iter()
        .map(|r| r.record.title.clone())
        .chain(outcome.pending.iter().map(|r| r.title.clone()))
        .collect();
    seen.sort();
    let mut expected: Vec<String> = input.iter().map(|r| r.title.clone()).collect();
    expected.sort();
    assert_eq!(seen, expected);
}
