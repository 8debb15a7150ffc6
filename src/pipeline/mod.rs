//! Batch pipeline: orchestration and run summaries.

mod orchestrator;
mod summary;

pub use orchestrator::{NoopObserver, Orchestrator, PipelineConfig, RunObserver};
pub use summary::{
    generate_run_id, ContactOutcome, ContactState, RunSummary, RunSummaryStore, SkipReason,
};
