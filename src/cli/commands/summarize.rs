//! Summarize Command
//!
//! Reads article records, runs them through the batch orchestrator and writes
//! the summarized records back out as JSON.
//!
//! Usage:
//!   newsgist summarize [--input FILE] [--output FILE] [--mode M] [--batch-size N]

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ai::metrics::{MetricsCollector, create_shared_metrics};
use crate::ai::provider::FallbackChain;
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, read_records, write_json};
use crate::config::SummaryMode;
use crate::summary::{BatchOrchestrator, RunOutcome, SummarizeOptions};
use crate::types::Result;

/// Options for a summarize run
#[derive(Debug, Default)]
pub struct SummarizeArgs {
    /// Input JSON file; stdin when `None`
    pub input: Option<PathBuf>,
    /// Output JSON file; stdout when `None`
    pub output: Option<PathBuf>,
    pub mode: Option<SummaryMode>,
    pub batch_size: Option<usize>,
    /// Suppress the metrics report
    pub quiet: bool,
}

pub async fn run(args: SummarizeArgs) -> Result<()> {
    let mut ctx = CommandContext::load()?;
    if let Some(mode) = args.mode {
        ctx.config.summarizer.mode = mode;
    }
    if let Some(batch_size) = args.batch_size {
        ctx.config.summarizer.batch_size = batch_size;
    }
    ctx.config.validate()?;

    let records = read_records(args.input.as_deref()).await?;

    let run_id = format!("run-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S"));
    let metrics = create_shared_metrics(run_id);
    let chain = ctx.chain(metrics.clone()).await?;
    let orchestrator = BatchOrchestrator::new(Arc::new(chain));
    let options = SummarizeOptions::from_config(&ctx.config.summarizer);

    let cancel = CancellationToken::new();
    let watcher = spawn_ctrl_c_watcher(cancel.clone());

    let outcome = orchestrator
        .summarize_with_cancel(&records, options, &cancel)
        .await;
    watcher.abort();

    write_json(&outcome.results, args.output.as_deref()).await?;

    if !args.quiet {
        report(&outcome, orchestrator.chain(), &metrics, args.output.is_none());
    }

    Ok(())
}

/// Cancel `token` on the first Ctrl-C
fn spawn_ctrl_c_watcher(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current batch");
            token.cancel();
        }
    })
}

fn report(
    outcome: &RunOutcome,
    chain: &FallbackChain,
    metrics: &MetricsCollector,
    results_on_stdout: bool,
) {
    let out = if results_on_stdout {
        Output::stderr()
    } else {
        Output::new()
    };

    out.header("Summarization Report");
    out.field("Mode", chain.mode());
    out.field("Summarized", outcome.results.len());
    out.field("Cache hits", outcome.cache_hits());

    let snapshot = metrics.snapshot();
    out.section("Metrics");
    out.block(&snapshot.display());

    let breakers = chain.breaker_stats();
    if !breakers.is_empty() {
        out.section("Circuit Breakers");
        for stats in &breakers {
            out.info(&stats.summary());
        }
    }

    if outcome.is_complete() {
        out.success(&format!("Summarized {} records", outcome.results.len()));
    } else {
        info!(pending = outcome.pending.len(), "Run ended before all records were dispatched");
        out.warning(&format!(
            "Cancelled: {} records were not summarized",
            outcome.pending.len()
        ));
    }
}
