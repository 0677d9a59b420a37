//! Provider Fallback Chain
//!
//! Resolves one record to a summary by trying providers in strict order and
//! stopping at the first success.
//!
//! ## Order
//!
//! 1. **Premium** (metered): mode `premium`, credentials present, not disabled
//!    by an earlier auth failure, and the usage governor admits the estimate
//! 2. **Secondary** (hosted): mode `secondary` or `premium`, credentials present
//! 3. **Local extractive**: always available, never fails
//!
//! Remote tiers run behind their own circuit breaker and retry policy. Every
//! attempt produces an [`AttemptOutcome`]; [`decide`] maps it to stop or fall
//! through without looking at anything else.
//!
//! A quota refusal is a skip, not a failure: it never reaches the provider,
//! is neutral to the breaker and is not retried. An authentication failure
//! disables that provider for the rest of the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, instrument, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use super::extractive::ExtractiveProvider;
use super::retry::RetryPolicy;
use super::{HuggingFaceProvider, OpenAiProvider, SharedProvider, SummaryProvider};
use crate::ai::metrics::{MetricEvent, NoopMetrics, SharedMetrics};
use crate::ai::quota::{SharedGovernor, UsageCaps, UsageDelta, UsageGovernor};
use crate::config::{Config, SummaryMode};
use crate::summary::cache::{CacheKey, SummaryCache};
use crate::types::{ArticleRecord, ErrorCategory, ProviderError, Result, SummaryResult};

// =============================================================================
// Outcomes
// =============================================================================

/// Position in the fallback order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainTier {
    Premium,
    Secondary,
    Local,
}

impl ChainTier {
    /// Whether `mode` allows this tier to be attempted
    pub fn enabled_in(self, mode: SummaryMode) -> bool {
        match self {
            Self::Premium => mode == SummaryMode::Premium,
            Self::Secondary => matches!(mode, SummaryMode::Secondary | SummaryMode::Premium),
            Self::Local => true,
        }
    }
}

impl std::fmt::Display for ChainTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Premium => write!(f, "premium"),
            Self::Secondary => write!(f, "secondary"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Why a tier was not attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Mode does not include this tier
    NotSelected,
    /// No provider configured (missing credentials)
    NotConfigured,
    /// Disabled for the run after an authentication failure
    Disabled,
    /// Usage governor refused the estimated usage
    QuotaRejected,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotSelected => write!(f, "not selected by mode"),
            Self::NotConfigured => write!(f, "not configured"),
            Self::Disabled => write!(f, "disabled after auth failure"),
            Self::QuotaRejected => write!(f, "quota rejected"),
        }
    }
}

/// Result of one tier's attempt
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Admitted(String),
    Skipped(SkipReason),
    Failed(ProviderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Stop,
    FallThrough,
}

/// Stop on a summary, fall through on anything else
pub fn decide(outcome: &AttemptOutcome) -> Decision {
    match outcome {
        AttemptOutcome::Admitted(_) => Decision::Stop,
        AttemptOutcome::Skipped(_) | AttemptOutcome::Failed(_) => Decision::FallThrough,
    }
}

// =============================================================================
// Remote Tier
// =============================================================================

/// A remote provider with its breaker, retry policy and run-scoped auth flag
struct RemoteTier {
    tier: ChainTier,
    provider: SharedProvider,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    /// Set after an authentication failure
    disabled: AtomicBool,
}

impl RemoteTier {
    fn new(
        tier: ChainTier,
        provider: SharedProvider,
        breaker: CircuitBreakerConfig,
        retry: RetryPolicy,
        metrics: SharedMetrics,
    ) -> Self {
        let name = provider.name().to_string();
        Self {
            tier,
            provider,
            breaker: CircuitBreaker::new(name, breaker).with_metrics(metrics),
            retry,
            disabled: AtomicBool::new(false),
        }
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}

// =============================================================================
// Fallback Chain
// =============================================================================

/// Per-record provider fallback with caching, quota and breakers
pub struct FallbackChain {
    mode: SummaryMode,
    premium: Option<RemoteTier>,
    secondary: Option<RemoteTier>,
    local: ExtractiveProvider,
    governor: SharedGovernor,
    caps: UsageCaps,
    cache: Option<SummaryCache>,
    metrics: SharedMetrics,
}

impl FallbackChain {
    pub fn builder(mode: SummaryMode) -> FallbackChainBuilder {
        FallbackChainBuilder::new(mode)
    }

    /// Build the chain from configuration.
    ///
    /// Remote tiers are only constructed when their mode is selected and an
    /// API key resolves.
    pub fn from_config(
        config: &Config,
        governor: SharedGovernor,
        cache: Option<SummaryCache>,
        metrics: SharedMetrics,
    ) -> Result<Self> {
        let mode = config.summarizer.mode;
        let mut builder = Self::builder(mode)
            .governor(governor)
            .caps(UsageCaps::from_config(&config.quota))
            .metrics(metrics);

        if let Some(cache) = cache {
            builder = builder.cache(cache);
        }

        if ChainTier::Premium.enabled_in(mode) {
            match config.premium.resolved_api_key() {
                Some(key) => {
                    let provider = OpenAiProvider::new(&config.premium, key)?;
                    builder = builder.premium(
                        Arc::new(provider),
                        CircuitBreakerConfig::from_config(
                            &config.premium.breaker,
                            config.premium.timeout(),
                        ),
                        RetryPolicy::from_config(&config.premium.retry),
                    );
                }
                None => warn!("Premium mode selected but no OpenAI API key found"),
            }
        }

        if ChainTier::Secondary.enabled_in(mode) {
            match config.secondary.resolved_api_key() {
                Some(token) => {
                    let provider = HuggingFaceProvider::new(&config.secondary, token)?;
                    builder = builder.secondary(
                        Arc::new(provider),
                        CircuitBreakerConfig::from_config(
                            &config.secondary.breaker,
                            config.secondary.timeout(),
                        ),
                        RetryPolicy::from_config(&config.secondary.retry),
                    );
                }
                None => debug!("No Hugging Face token found, secondary provider unavailable"),
            }
        }

        Ok(builder.build())
    }

    pub fn mode(&self) -> SummaryMode {
        self.mode
    }

    pub fn cache(&self) -> Option<&SummaryCache> {
        self.cache.as_ref()
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Breaker stats for every configured remote tier
    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        [&self.premium, &self.secondary]
            .into_iter()
            .flatten()
            .map(|remote| remote.breaker.stats())
            .collect()
    }

    /// Summarize one record. Never fails; the local tier is the terminal case.
    ///
    /// The result is written to the cache before it is returned.
    #[instrument(skip(self, record), fields(asset = %record.source_asset, mode = %self.mode))]
    pub async fn summarize(&self, record: &ArticleRecord) -> SummaryResult {
        let text = record.summarizable_text();

        let (summary, provider_name, provider_version) = match self.resolve(text).await {
            Some(produced) => produced,
            None => (
                self.local.summarize_text(text),
                self.local.name().to_string(),
                self.local.version().to_string(),
            ),
        };

        if let Some(cache) = &self.cache {
            cache
                .store_summary(
                    &CacheKey::for_record(record),
                    &summary,
                    &provider_name,
                    &provider_version,
                )
                .await;
        }

        self.metrics
            .increment(MetricEvent::SummaryProduced, Some(&provider_name));

        SummaryResult {
            record: record.clone(),
            summary,
            provider_name,
            provider_version,
            from_cache: false,
        }
    }

    /// Walk the remote tiers; `None` means fall through to local
    async fn resolve(&self, text: &str) -> Option<(String, String, String)> {
        for tier in [ChainTier::Premium, ChainTier::Secondary] {
            let outcome = self.attempt(tier, text).await;
            let remote = match tier {
                ChainTier::Premium => self.premium.as_ref(),
                _ => self.secondary.as_ref(),
            };

            if decide(&outcome) == Decision::Stop
                && let (AttemptOutcome::Admitted(summary), Some(remote)) = (outcome.clone(), remote)
            {
                return Some((
                    summary,
                    remote.name().to_string(),
                    remote.provider.version().to_string(),
                ));
            }

            match &outcome {
                AttemptOutcome::Skipped(reason) => debug!(%tier, %reason, "Tier skipped"),
                AttemptOutcome::Failed(err) => warn!(
                    %tier,
                    provider = err.provider.as_deref().unwrap_or("unknown"),
                    category = %err.category,
                    error = %err.message,
                    "Tier failed, falling through"
                ),
                AttemptOutcome::Admitted(_) => {}
            }
        }
        None
    }

    /// Run a single tier to a tagged outcome
    async fn attempt(&self, tier: ChainTier, text: &str) -> AttemptOutcome {
        if !tier.enabled_in(self.mode) {
            return AttemptOutcome::Skipped(SkipReason::NotSelected);
        }

        let remote = match tier {
            ChainTier::Premium => self.premium.as_ref(),
            ChainTier::Secondary => self.secondary.as_ref(),
            ChainTier::Local => return AttemptOutcome::Admitted(self.local.summarize_text(text)),
        };
        let Some(remote) = remote else {
            return AttemptOutcome::Skipped(SkipReason::NotConfigured);
        };
        if remote.disabled.load(Ordering::Acquire) {
            return AttemptOutcome::Skipped(SkipReason::Disabled);
        }

        // Metered tiers reserve before every attempt that reaches the provider
        let reservation = match remote.tier {
            ChainTier::Premium => Some(
                remote
                    .provider
                    .usage_estimate(text)
                    .unwrap_or_else(|| UsageDelta::new(0, 1, 0.0)),
            ),
            _ => None,
        };

        let result = remote
            .retry
            .run(remote.name(), || self.guarded_call(remote, text, reservation))
            .await;

        match result {
            Ok(summary) => AttemptOutcome::Admitted(summary),
            Err(err) if err.category == ErrorCategory::QuotaExceeded => {
                self.metrics
                    .increment(MetricEvent::QuotaRejected, Some(remote.name()));
                AttemptOutcome::Skipped(SkipReason::QuotaRejected)
            }
            Err(err) => {
                if err.is_auth() && !remote.disabled.swap(true, Ordering::AcqRel) {
                    warn!(
                        provider = remote.name(),
                        "Authentication failed, provider disabled for the rest of the run"
                    );
                }
                AttemptOutcome::Failed(err)
            }
        }
    }

    /// One breaker-guarded call, with quota reservation for metered tiers
    async fn guarded_call(
        &self,
        remote: &RemoteTier,
        text: &str,
        reservation: Option<UsageDelta>,
    ) -> std::result::Result<String, ProviderError> {
        let name = remote.name();

        // Reservation runs under the governor's own timeout, outside the
        // provider timeout, and a refusal is neutral for the breaker.
        let admission = async {
            if let Some(delta) = &reservation
                && !self.governor.reserve(delta, &self.caps).await
            {
                return Err(ProviderError::quota_exceeded(name));
            }
            Ok(())
        };

        let call = async {
            self.metrics
                .increment(MetricEvent::ProviderAttempted, Some(name));
            let summary = remote.provider.summarize(text).await?;
            let summary = summary.trim();
            if summary.is_empty() {
                return Err(ProviderError::with_provider(
                    ErrorCategory::ParseError,
                    "empty summary",
                    name,
                ));
            }
            Ok(summary.to_string())
        };

        let result = remote.breaker.call_gated(admission, call).await;

        match &result {
            Ok(_) => self
                .metrics
                .increment(MetricEvent::ProviderSucceeded, Some(name)),
            Err(err) if err.category.counts_against_provider() => {
                debug!(
                    provider = name,
                    category = %err.category,
                    error = %err.message,
                    "Provider call failed"
                );
                self.metrics
                    .increment(MetricEvent::ProviderFailed, Some(name));
            }
            Err(_) => {}
        }

        result
    }
}

// =============================================================================
// Builder
// =============================================================================

pub struct FallbackChainBuilder {
    mode: SummaryMode,
    premium: Option<(SharedProvider, CircuitBreakerConfig, RetryPolicy)>,
    secondary: Option<(SharedProvider, CircuitBreakerConfig, RetryPolicy)>,
    governor: Option<SharedGovernor>,
    caps: UsageCaps,
    cache: Option<SummaryCache>,
    metrics: SharedMetrics,
}

impl FallbackChainBuilder {
    pub fn new(mode: SummaryMode) -> Self {
        Self {
            mode,
            premium: None,
            secondary: None,
            governor: None,
            caps: UsageCaps::unlimited(),
            cache: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn premium(
        mut self,
        provider: SharedProvider,
        breaker: CircuitBreakerConfig,
        retry: RetryPolicy,
    ) -> Self {
        self.premium = Some((provider, breaker, retry));
        self
    }

    pub fn secondary(
        mut self,
        provider: SharedProvider,
        breaker: CircuitBreakerConfig,
        retry: RetryPolicy,
    ) -> Self {
        self.secondary = Some((provider, breaker, retry));
        self
    }

    pub fn governor(mut self, governor: SharedGovernor) -> Self {
        self.governor = Some(governor);
        self
    }

    pub fn caps(mut self, caps: UsageCaps) -> Self {
        self.caps = caps;
        self
    }

    pub fn cache(mut self, cache: SummaryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> FallbackChain {
        let metrics = self.metrics;
        let remote = |tier, parts: Option<(SharedProvider, CircuitBreakerConfig, RetryPolicy)>| {
            parts.map(|(provider, breaker, retry)| {
                RemoteTier::new(tier, provider, breaker, retry, Arc::clone(&metrics))
            })
        };

        let premium = remote(ChainTier::Premium, self.premium);
        let secondary = remote(ChainTier::Secondary, self.secondary);

        info!(
            mode = %self.mode,
            premium = premium.as_ref().map_or("-", |r| r.name()),
            secondary = secondary.as_ref().map_or("-", |r| r.name()),
            "Fallback chain ready"
        );

        FallbackChain {
            mode: self.mode,
            premium,
            secondary,
            local: ExtractiveProvider::default(),
            governor: self
                .governor
                .unwrap_or_else(|| Arc::new(UsageGovernor::in_memory())),
            caps: self.caps,
            cache: self.cache,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::metrics::MetricsCollector;
    use crate::ai::provider::circuit_breaker::CircuitState;
    use crate::ai::quota::{LocalQuotaStore, QuotaStore, UsageState};
    use crate::storage::MemoryStore;
    use crate::types::GistError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Provider that replays a fixed behavior and counts calls
    struct ScriptedProvider {
        name: &'static str,
        behavior: Behavior,
        calls: AtomicU32,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail(ErrorCategory),
    }

    impl ScriptedProvider {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
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

        async fn summarize(&self, text: &str) -> std::result::Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(format!("{} says: {}", self.name, text)),
                Behavior::Fail(category) => {
                    Err(ProviderError::with_provider(category, "scripted", self.name))
                }
            }
        }

        fn usage_estimate(&self, _text: &str) -> Option<UsageDelta> {
            Some(UsageDelta::new(100, 1, 0.0))
        }
    }

    struct FailingQuotaStore;

    #[async_trait]
    impl QuotaStore for FailingQuotaStore {
        fn tier(&self) -> crate::ai::quota::ConsistencyTier {
            crate::ai::quota::ConsistencyTier::Atomic
        }

        fn backend(&self) -> &'static str {
            "failing"
        }

        async fn try_reserve(
            &self,
            _delta: &UsageDelta,
            _caps: &UsageCaps,
        ) -> Result<Option<UsageState>> {
            Err(GistError::storage("connection refused"))
        }

        async fn usage(&self) -> Result<UsageState> {
            Err(GistError::storage("connection refused"))
        }
    }

    /// Answers after `delay`, delegating to an in-memory store
    struct SlowQuotaStore {
        delay: Duration,
        inner: LocalQuotaStore,
    }

    impl SlowQuotaStore {
        fn governor(delay: Duration) -> SharedGovernor {
            Arc::new(UsageGovernor::new(Arc::new(Self {
                delay,
                inner: LocalQuotaStore::new(),
            })))
        }
    }

    #[async_trait]
    impl QuotaStore for SlowQuotaStore {
        fn tier(&self) -> crate::ai::quota::ConsistencyTier {
            crate::ai::quota::ConsistencyTier::Atomic
        }

        fn backend(&self) -> &'static str {
            "slow"
        }

        async fn try_reserve(
            &self,
            delta: &UsageDelta,
            caps: &UsageCaps,
        ) -> Result<Option<UsageState>> {
            tokio::time::sleep(self.delay).await;
            self.inner.try_reserve(delta, caps).await
        }

        async fn usage(&self) -> Result<UsageState> {
            self.inner.usage().await
        }
    }

    fn breaker() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            error_threshold_pct: 50,
            volume_threshold: 2,
            rolling_window: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(5),
        }
    }

    fn retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            jitter: false,
            ..RetryPolicy::none()
        }
    }

    fn record() -> ArticleRecord {
        ArticleRecord::new("btc", "Rally").with_text("Bitcoin rallied. Volume surged.")
    }

    #[test]
    fn test_decide_is_pure() {
        assert_eq!(decide(&AttemptOutcome::Admitted("s".into())), Decision::Stop);
        assert_eq!(
            decide(&AttemptOutcome::Skipped(SkipReason::QuotaRejected)),
            Decision::FallThrough
        );
        assert_eq!(
            decide(&AttemptOutcome::Failed(ProviderError::breaker_open("x"))),
            Decision::FallThrough
        );
    }

    #[test]
    fn test_tier_eligibility_by_mode() {
        assert!(!ChainTier::Premium.enabled_in(SummaryMode::Local));
        assert!(!ChainTier::Secondary.enabled_in(SummaryMode::Local));
        assert!(!ChainTier::Premium.enabled_in(SummaryMode::Secondary));
        assert!(ChainTier::Secondary.enabled_in(SummaryMode::Secondary));
        assert!(ChainTier::Premium.enabled_in(SummaryMode::Premium));
        assert!(ChainTier::Secondary.enabled_in(SummaryMode::Premium));
        assert!(ChainTier::Local.enabled_in(SummaryMode::Local));
    }

    #[tokio::test]
    async fn test_local_mode_never_calls_remote() {
        let premium = ScriptedProvider::new("openai", Behavior::Succeed);
        let chain = FallbackChain::builder(SummaryMode::Local)
            .premium(premium.clone(), breaker(), retry(1))
            .build();

        let result = chain.summarize(&record()).await;
        assert_eq!(result.provider_name, "local-extractive");
        assert_eq!(result.summary, "Bitcoin rallied. Volume surged.");
        assert!(!result.from_cache);
        assert_eq!(premium.calls(), 0);
    }

    #[tokio::test]
    async fn test_premium_success_records_provenance_and_caches() {
        let premium = ScriptedProvider::new("openai", Behavior::Succeed);
        let cache = SummaryCache::with_default_ttl(Arc::new(MemoryStore::new()));
        let metrics = Arc::new(MetricsCollector::new("t"));
        let chain = FallbackChain::builder(SummaryMode::Premium)
            .premium(premium.clone(), breaker(), retry(1))
            .cache(cache.clone())
            .metrics(metrics.clone())
            .build();

        let result = chain.summarize(&record()).await;
        assert_eq!(result.provider_name, "openai");
        assert_eq!(result.provider_version, "test-1");

        let entry = cache.lookup(&CacheKey::for_record(&record())).await.unwrap();
        assert_eq!(entry.summary, result.summary);
        assert_eq!(entry.provider_name, "openai");
        assert_eq!(metrics.count(MetricEvent::ProviderAttempted, Some("openai")), 1);
        assert_eq!(metrics.count(MetricEvent::ProviderSucceeded, Some("openai")), 1);
        assert_eq!(metrics.count(MetricEvent::SummaryProduced, Some("openai")), 1);
    }

    #[tokio::test]
    async fn test_quota_rejection_skips_to_secondary() {
        let premium = ScriptedProvider::new("openai", Behavior::Succeed);
        let secondary = ScriptedProvider::new("huggingface", Behavior::Succeed);
        let metrics = Arc::new(MetricsCollector::new("t"));
        let chain = FallbackChain::builder(SummaryMode::Premium)
            .premium(premium.clone(), breaker(), retry(2))
            .secondary(secondary.clone(), breaker(), retry(1))
            .caps(UsageCaps {
                max_tokens_per_run: 50,
                ..UsageCaps::unlimited()
            })
            .metrics(metrics.clone())
            .build();

        let result = chain.summarize(&record()).await;
        assert_eq!(result.provider_name, "huggingface");
        assert_eq!(premium.calls(), 0);
        assert_eq!(metrics.count(MetricEvent::QuotaRejected, Some("openai")), 1);
        assert_eq!(metrics.count(MetricEvent::ProviderFailed, Some("openai")), 0);
        assert_eq!(chain.breaker_stats()[0].window_failures, 0);
    }

    #[tokio::test]
    async fn test_governor_failure_fails_closed() {
        let premium = ScriptedProvider::new("openai", Behavior::Succeed);
        let chain = FallbackChain::builder(SummaryMode::Premium)
            .premium(premium.clone(), breaker(), retry(1))
            .governor(Arc::new(UsageGovernor::new(Arc::new(FailingQuotaStore))))
            .build();

        let result = chain.summarize(&record()).await;
        assert_eq!(result.provider_name, "local-extractive");
        assert_eq!(premium.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_reservation_is_not_charged_to_provider_timeout() {
        // Slower than the 5s call timeout, faster than the reservation timeout
        let premium = ScriptedProvider::new("openai", Behavior::Succeed);
        let governor = SlowQuotaStore::governor(Duration::from_secs(8));
        let chain = FallbackChain::builder(SummaryMode::Premium)
            .premium(premium.clone(), breaker(), retry(1))
            .governor(governor.clone())
            .build();

        let result = chain.summarize(&record()).await;
        assert_eq!(result.provider_name, "openai");
        assert_eq!(premium.calls(), 1);
        assert_eq!(governor.usage().await.requests_made, 1);

        let stats = &chain.breaker_stats()[0];
        assert_eq!(stats.window_failures, 0);
        assert_eq!(stats.window_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_reservation_leaves_breaker_window_empty() {
        let premium = ScriptedProvider::new("openai", Behavior::Succeed);
        let metrics = Arc::new(MetricsCollector::new("t"));
        let chain = FallbackChain::builder(SummaryMode::Premium)
            .premium(premium.clone(), breaker(), retry(2))
            .governor(SlowQuotaStore::governor(Duration::from_secs(60)))
            .metrics(metrics.clone())
            .build();

        for _ in 0..3 {
            let result = chain.summarize(&record()).await;
            assert_eq!(result.provider_name, "local-extractive");
        }

        assert_eq!(premium.calls(), 0);
        assert_eq!(metrics.count(MetricEvent::QuotaRejected, Some("openai")), 3);
        assert_eq!(metrics.count(MetricEvent::ProviderFailed, Some("openai")), 0);
        let stats = &chain.breaker_stats()[0];
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.window_failures + stats.window_successes, 0);
    }

    #[tokio::test]
    async fn test_auth_failure_disables_provider_for_run() {
        let premium = ScriptedProvider::new("openai", Behavior::Fail(ErrorCategory::Auth));
        let chain = FallbackChain::builder(SummaryMode::Premium)
            .premium(premium.clone(), breaker(), retry(3))
            .build();

        let first = chain.summarize(&record()).await;
        let second = chain.summarize(&record()).await;
        assert_eq!(first.provider_name, "local-extractive");
        assert_eq!(second.provider_name, "local-extractive");
        // Not retried, and never called again
        assert_eq!(premium.calls(), 1);
        assert_eq!(
            chain.attempt(ChainTier::Premium, "x").await.skip_reason(),
            Some(SkipReason::Disabled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retried_then_fall_through() {
        let secondary =
            ScriptedProvider::new("huggingface", Behavior::Fail(ErrorCategory::Transient));
        let metrics = Arc::new(MetricsCollector::new("t"));
        let chain = FallbackChain::builder(SummaryMode::Secondary)
            .secondary(
                secondary.clone(),
                CircuitBreakerConfig {
                    volume_threshold: 100,
                    ..breaker()
                },
                retry(3),
            )
            .metrics(metrics.clone())
            .build();

        let result = chain.summarize(&record()).await;
        assert_eq!(result.provider_name, "local-extractive");
        assert_eq!(secondary.calls(), 3);
        assert_eq!(metrics.count(MetricEvent::ProviderFailed, Some("huggingface")), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_fails_fast_without_calling_provider() {
        let secondary =
            ScriptedProvider::new("huggingface", Behavior::Fail(ErrorCategory::Transient));
        let chain = FallbackChain::builder(SummaryMode::Secondary)
            .secondary(secondary.clone(), breaker(), retry(1))
            .build();

        chain.summarize(&record()).await;
        chain.summarize(&record()).await;
        assert_eq!(secondary.calls(), 2);

        let outcome = chain.attempt(ChainTier::Secondary, "x").await;
        match outcome {
            AttemptOutcome::Failed(err) => assert!(err.is_breaker_open()),
            other => panic!("expected breaker rejection, got {other:?}"),
        }
        assert_eq!(secondary.calls(), 2);
    }

    #[tokio::test]
    async fn test_secondary_without_credentials_is_skipped() {
        let chain = FallbackChain::builder(SummaryMode::Secondary).build();
        assert_eq!(
            chain.attempt(ChainTier::Secondary, "x").await.skip_reason(),
            Some(SkipReason::NotConfigured)
        );
        assert_eq!(
            chain.attempt(ChainTier::Premium, "x").await.skip_reason(),
            Some(SkipReason::NotSelected)
        );
    }

    impl AttemptOutcome {
        fn skip_reason(&self) -> Option<SkipReason> {
            match self {
                Self::Skipped(reason) => Some(*reason),
                _ => None,
            }
        }
    }
}
