//! draftpilot: budget-aware email drafting.
//!
//! Reads contacts from a spreadsheet, generates a personalised email body for
//! each through a language-model backend, and saves the result as a draft,
//! while keeping monthly API spend under a configured limit and never paying
//! twice for the same (recipient, context) pair.

pub mod budget;
pub mod cache;
pub mod config;
pub mod contacts;
pub mod drafts;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod storage;

pub use error::{PersistenceError, PipelineError, PipelineResult};
pub use pipeline::{Orchestrator, PipelineConfig, RunSummary};
