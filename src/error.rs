//! Batch-level error types.
//!
//! Per-contact conditions (budget skips, backend failures) are not errors;
//! they travel in [`crate::pipeline::ContactOutcome`]. Only the failures that
//! end or halt a batch live here.

use thiserror::Error;

use crate::budget::LedgerError;
use crate::cache::CacheError;
use crate::contacts::SourceError;

/// A durable store could not be read or written.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("usage ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("content cache: {0}")]
    Cache(#[from] CacheError),
}

/// Failures that stop a batch from running.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Contacts could not be listed at batch start.
    #[error("{0}")]
    SourceUnavailable(#[from] SourceError),

    /// The ledger or cache could not be opened.
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),
}

impl From<LedgerError> for PipelineError {
    fn from(err: LedgerError) -> Self {
        PipelineError::Persistence(err.into())
    }
}

impl From<CacheError> for PipelineError {
    fn from(err: CacheError) -> Self {
        PipelineError::Persistence(err.into())
    }
}

/// Result type for batch operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
