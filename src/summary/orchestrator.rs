//! Batch Orchestrator
//!
//! Resolves cache hits up front, then pushes the misses through the fallback
//! chain in fixed-size batches. Items within a batch run concurrently;
//! batches run one after another, which bounds in-flight remote calls to the
//! batch size.
//!
//! Output order is cache hits (input order) followed by misses in completion
//! order. Every input record appears exactly once, either in `results` or,
//! after cancellation, in `pending`.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ai::metrics::MetricEvent;
use crate::ai::provider::FallbackChain;
use crate::config::SummarizerConfig;
use crate::constants::batch as batch_constants;
use crate::summary::cache::CacheKey;
use crate::types::{ArticleRecord, SummaryResult};

/// Per-run orchestration options
#[derive(Debug, Clone, Copy)]
pub struct SummarizeOptions {
    /// Records dispatched concurrently per batch
    pub batch_size: usize,
}

impl Default for SummarizeOptions {
    fn default() -> Self {
        Self {
            batch_size: batch_constants::DEFAULT_BATCH_SIZE,
        }
    }
}

impl SummarizeOptions {
    pub fn from_config(config: &SummarizerConfig) -> Self {
        Self {
            batch_size: config.batch_size,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Results of a possibly cancelled run
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub results: Vec<SummaryResult>,
    /// Records never dispatched because the run was cancelled
    pub pending: Vec<ArticleRecord>,
}

impl RunOutcome {
    pub fn cache_hits(&self) -> usize {
        self.results.iter().filter(|r| r.from_cache).count()
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

pub struct BatchOrchestrator {
    chain: Arc<FallbackChain>,
}

impl BatchOrchestrator {
    pub fn new(chain: Arc<FallbackChain>) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &Arc<FallbackChain> {
        &self.chain
    }

    /// Summarize every record. Never fails.
    pub async fn summarize(
        &self,
        records: &[ArticleRecord],
        options: SummarizeOptions,
    ) -> Vec<SummaryResult> {
        self.summarize_with_cancel(records, options, &CancellationToken::new())
            .await
            .results
    }

    /// Summarize with cooperative cancellation.
    ///
    /// Cancellation is checked between batches: the batch in flight drains
    /// completely and its results are kept, no further batch starts.
    pub async fn summarize_with_cancel(
        &self,
        records: &[ArticleRecord],
        options: SummarizeOptions,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let batch_size = options.batch_size.max(1);
        let mut outcome = RunOutcome {
            results: Vec::with_capacity(records.len()),
            pending: Vec::new(),
        };

        let misses = self.resolve_cached(records, &mut outcome.results).await;

        info!(
            total = records.len(),
            cache_hits = outcome.results.len(),
            misses = misses.len(),
            batch_size,
            "Starting summarization"
        );

        let batch_count = misses.len().div_ceil(batch_size);
        let mut batches = misses.chunks(batch_size).enumerate();

        while let Some((index, batch)) = batches.next() {
            if cancel.is_cancelled() {
                outcome.pending.extend(batch.iter().map(|r| (*r).clone()));
                for (_, rest) in batches.by_ref() {
                    outcome.pending.extend(rest.iter().map(|r| (*r).clone()));
                }
                info!(
                    completed_batches = index,
                    pending = outcome.pending.len(),
                    "Run cancelled, remaining batches not started"
                );
                break;
            }

            debug!(batch = index + 1, of = batch_count, size = batch.len(), "Dispatching batch");

            let summarized: Vec<SummaryResult> = futures::stream::iter(batch.iter().copied())
                .map(|record| self.chain.summarize(record))
                .buffer_unordered(batch_size)
                .collect()
                .await;

            outcome.results.extend(summarized);
        }

        info!(
            summarized = outcome.results.len(),
            pending = outcome.pending.len(),
            "Summarization finished"
        );

        outcome
    }

    /// Push fresh cache hits into `results`; return the misses in input order
    async fn resolve_cached<'a>(
        &self,
        records: &'a [ArticleRecord],
        results: &mut Vec<SummaryResult>,
    ) -> Vec<&'a ArticleRecord> {
        let Some(cache) = self.chain.cache() else {
            return records.iter().collect();
        };

        let mut misses = Vec::new();
        for record in records {
            match cache.lookup(&CacheKey::for_record(record)).await {
                Some(entry) => {
                    self.chain.metrics().increment(MetricEvent::CacheHit, None);
                    results.push(SummaryResult {
                        record: record.clone(),
                        summary: entry.summary,
                        provider_name: entry.provider_name,
                        provider_version: entry.provider_version,
                        from_cache: true,
                    });
                }
                None => misses.push(record),
            }
        }
        misses
    }
}
