//! Summary caching and batch orchestration

pub mod cache;
pub mod orchestrator;

pub use cache::{CacheEntry, CacheKey, SummaryCache};
pub use orchestrator::{BatchOrchestrator, RunOutcome, SummarizeOptions};
