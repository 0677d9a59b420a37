//! Summarization Metrics
//!
//! The governor emits named counter and latency events through the
//! [`MetricsSink`] trait and never registers metrics itself. Two sinks ship
//! with the crate: [`NoopMetrics`] and the in-process [`MetricsCollector`],
//! which aggregates events for an end-of-run report.
//!
//! ## Usage
//!
//! ```ignore
//! let metrics = create_shared_metrics("run-42");
//! metrics.increment(MetricEvent::CacheHit, None);
//! metrics.observe_latency("openai", Duration::from_millis(850));
//! println!("{}", metrics.snapshot().display());
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

// =============================================================================
// Events
// =============================================================================

/// Counter events emitted by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricEvent {
    CacheHit,
    ProviderAttempted,
    ProviderSucceeded,
    ProviderFailed,
    BreakerOpened,
    BreakerClosed,
    SummaryProduced,
    QuotaRejected,
}

impl MetricEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CacheHit => "cache_hit",
            Self::ProviderAttempted => "provider_attempted",
            Self::ProviderSucceeded => "provider_succeeded",
            Self::ProviderFailed => "provider_failed",
            Self::BreakerOpened => "breaker_opened",
            Self::BreakerClosed => "breaker_closed",
            Self::SummaryProduced => "summary_produced",
            Self::QuotaRejected => "quota_rejected",
        }
    }
}

impl std::fmt::Display for MetricEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fire-and-forget metrics destination
pub trait MetricsSink: Send + Sync {
    /// Bump a counter, optionally labelled by provider
    fn increment(&self, event: MetricEvent, provider: Option<&str>);

    /// Record the wall-clock latency of one remote provider call
    fn observe_latency(&self, provider: &str, latency: Duration);
}

pub type SharedMetrics = Arc<dyn MetricsSink>;

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _event: MetricEvent, _provider: Option<&str>) {}

    fn observe_latency(&self, _provider: &str, _latency: Duration) {}
}

// =============================================================================
// Metrics Collector
// =============================================================================

#[derive(Debug, Default)]
struct LatencyCell {
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
}

/// Thread-safe in-process aggregation of metric events.
///
/// Counters are keyed by `(event, provider)`; unlabelled events use an empty
/// provider.
pub struct MetricsCollector {
    run_id: String,
    start_time: Instant,
    counters: DashMap<(MetricEvent, String), AtomicU64>,
    latencies: DashMap<String, LatencyCell>,
}

/// Latency aggregate for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub calls: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
}

/// Point-in-time copy of collected metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub run_id: String,
    pub elapsed_ms: u64,
    /// `"event"` or `"event{provider}"` -> count
    pub counters: BTreeMap<String, u64>,
    pub latencies: BTreeMap<String, LatencySummary>,
}

impl MetricsCollector {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            start_time: Instant::now(),
            counters: DashMap::new(),
            latencies: DashMap::new(),
        }
    }

    /// Count for one event and label
    pub fn count(&self, event: MetricEvent, provider: Option<&str>) -> u64 {
        self.counters
            .get(&(event, provider.unwrap_or_default().to_string()))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Count for one event summed over every label
    pub fn total(&self, event: MetricEvent) -> u64 {
        self.counters
            .iter()
            .filter(|entry| entry.key().0 == event)
            .map(|entry| entry.value().load(Ordering::Relaxed))
            .sum()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .iter()
            .map(|entry| {
                let (event, provider) = entry.key();
                let name = if provider.is_empty() {
                    event.name().to_string()
                } else {
                    format!("{}{{{}}}", event.name(), provider)
                };
                (name, entry.value().load(Ordering::Relaxed))
            })
            .collect();

        let latencies = self
            .latencies
            .iter()
            .map(|entry| {
                let cell = entry.value();
                let calls = cell.count.load(Ordering::Relaxed);
                let total = cell.total_ms.load(Ordering::Relaxed);
                let summary = LatencySummary {
                    calls,
                    avg_ms: if calls > 0 {
                        total as f64 / calls as f64
                    } else {
                        0.0
                    },
                    max_ms: cell.max_ms.load(Ordering::Relaxed),
                };
                (entry.key().clone(), summary)
            })
            .collect();

        MetricsSnapshot {
            run_id: self.run_id.clone(),
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
            counters,
            latencies,
        }
    }
}

impl MetricsSink for MetricsCollector {
    fn increment(&self, event: MetricEvent, provider: Option<&str>) {
        self.counters
            .entry((event, provider.unwrap_or_default().to_string()))
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    fn observe_latency(&self, provider: &str, latency: Duration) {
        let ms = latency.as_millis() as u64;
        let cell = self.latencies.entry(provider.to_string()).or_default();
        cell.count.fetch_add(1, Ordering::Relaxed);
        cell.total_ms.fetch_add(ms, Ordering::Relaxed);
        cell.max_ms.fetch_max(ms, Ordering::Relaxed);
    }
}

impl MetricsSnapshot {
    /// Format snapshot for display
    pub fn display(&self) -> String {
        let mut out = format!(
            "Run: {}\nDuration: {:.1}s",
            self.run_id,
            self.elapsed_ms as f64 / 1000.0
        );

        if self.counters.is_empty() {
            out.push_str("\nNo events recorded");
        }
        for (name, count) in &self.counters {
            out.push_str(&format!("\n  {:<40} {}", name, count));
        }

        for (provider, latency) in &self.latencies {
            out.push_str(&format!(
                "\n  latency{{{}}}: {} calls, avg {:.0}ms, max {}ms",
                provider, latency.calls, latency.avg_ms, latency.max_ms
            ));
        }

        out
    }
}

/// Create shared in-process collector
pub fn create_shared_metrics(run_id: impl Into<String>) -> Arc<MetricsCollector> {
    Arc::new(MetricsCollector::new(run_id))
}

// =============================================================================
// Tests
// =============================================================================
