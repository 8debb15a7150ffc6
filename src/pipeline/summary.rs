//! End-of-run summary and its on-disk store.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::{BudgetStatus, Period, SelectionSkip, TierKind};
use crate::storage;

/// Generate a unique run identifier.
pub fn generate_run_id() -> String {
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("run-{}-{}", timestamp_ms, std::process::id())
}

/// Where a contact is in the pipeline.
///
/// `Pending -> CacheHit | Generating -> Generated -> Drafted`, or
/// `Pending -> Skipped`. A contact whose draft could not be saved stays in
/// `CacheHit` or `Generated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactState {
    Pending,
    CacheHit,
    Generating,
    Generated,
    Drafted,
    Skipped,
}

impl ContactState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactState::Pending => "pending",
            ContactState::CacheHit => "cache_hit",
            ContactState::Generating => "generating",
            ContactState::Generated => "generated",
            ContactState::Drafted => "drafted",
            ContactState::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ContactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a contact was not generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// The selector found no affordable tier
    Budget(SelectionSkip),
    /// The backend call failed; nothing was charged
    BackendError(String),
    /// An earlier persistence failure stopped new generation
    PersistenceHalted,
}

impl SkipReason {
    /// Counted as skipped-budget rather than skipped-error.
    pub fn is_budget(&self) -> bool {
        matches!(self, SkipReason::Budget(_))
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Budget(skip) => write!(f, "{}", skip),
            SkipReason::BackendError(message) => write!(f, "backend error: {}", message),
            SkipReason::PersistenceHalted => f.write_str("halted after persistence failure"),
        }
    }
}

/// What happened to one contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactOutcome {
    pub email: String,
    pub first_name: String,
    pub fingerprint: String,
    pub state: ContactState,
    /// Content came from the cache
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<TierKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Charged during this run (zero for cache hits and skips)
    pub cost: f64,
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_error: Option<String>,
}

impl ContactOutcome {
    pub fn is_skipped(&self) -> bool {
        self.skip_reason.is_some()
    }

    pub fn is_generated(&self) -> bool {
        !self.cache_hit && !self.is_skipped()
    }
}

/// Result of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub period: Period,
    /// Contacts listed by the source
    pub total_contacts: usize,
    /// Contacts left out by the batch limit
    pub not_processed: usize,
    pub generated: usize,
    pub cache_hits: usize,
    pub skipped_budget: usize,
    pub skipped_error: usize,
    pub degraded: usize,
    pub draft_failures: usize,
    /// Spend charged during this run in USD
    pub run_cost: f64,
    /// Monthly budget left for `period`
    pub remaining_budget: f64,
    pub budget_status: BudgetStatus,
    /// Set when a persistence failure stopped new generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
    pub outcomes: Vec<ContactOutcome>,
}

impl RunSummary {
    /// Contacts that went through the pipeline.
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Recompute the counters from the outcomes.
    pub(crate) fn tally(&mut self) {
        self.generated = self.outcomes.iter().filter(|o| o.is_generated()).count();
        self.cache_hits = self
            .outcomes
            .iter()
            .filter(|o| o.cache_hit && !o.is_skipped())
            .count();
        self.skipped_budget = self
            .outcomes
            .iter()
            .filter(|o| o.skip_reason.as_ref().is_some_and(SkipReason::is_budget))
            .count();
        self.skipped_error = self
            .outcomes
            .iter()
            .filter(|o| o.skip_reason.as_ref().is_some_and(|r| !r.is_budget()))
            .count();
        self.degraded = self.outcomes.iter().filter(|o| o.degraded).count();
        self.draft_failures = self
            .outcomes
            .iter()
            .filter(|o| o.draft_error.is_some())
            .count();
        self.run_cost = self.outcomes.iter().map(|o| o.cost).sum();
    }

    /// Human-readable report.
    pub fn format(&self) -> String {
        let mut output = String::from("===== Run Summary =====\n");
        output.push_str(&format!("Run: {}\n", self.run_id));
        output.push_str(&format!("Month: {}\n", self.period));
        output.push_str(&format!(
            "Contacts: {} processed of {}",
            self.processed(),
            self.total_contacts
        ));
        if self.not_processed > 0 {
            output.push_str(&format!(" ({} over batch limit)", self.not_processed));
        }
        output.push('\n');
        output.push_str(&format!("Generated: {}\n", self.generated));
        output.push_str(&format!("Cache hits: {}\n", self.cache_hits));
        output.push_str(&format!("Skipped (budget): {}\n", self.skipped_budget));
        output.push_str(&format!("Skipped (error): {}\n", self.skipped_error));
        if self.degraded > 0 {
            output.push_str(&format!("Degraded to standard tier: {}\n", self.degraded));
        }
        if self.draft_failures > 0 {
            output.push_str(&format!("Draft failures: {}\n", self.draft_failures));
        }
        output.push_str(&format!("Run cost: ${:.4}\n", self.run_cost));
        output.push_str(&format!(
            "Remaining budget: ${:.2} ({})\n",
            self.remaining_budget, self.budget_status
        ));

        let skipped: Vec<_> = self.outcomes.iter().filter(|o| o.is_skipped()).collect();
        if !skipped.is_empty() {
            output.push_str("\nSkipped contacts:\n");
            for outcome in skipped {
                if let Some(reason) = &outcome.skip_reason {
                    output.push_str(&format!("  {}: {}\n", outcome.email, reason));
                }
            }
        }

        if let Some(reason) = &self.halted {
            output.push_str(&format!("\nHALTED: {}\n", reason));
        }
        output.push_str("=======================");
        output
    }
}

/// Stores run summaries as `<dir>/<run_id>.json`.
#[derive(Debug, Clone)]
pub struct RunSummaryStore {
    runs_dir: PathBuf,
}

impl RunSummaryStore {
    pub fn new(runs_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let runs_dir = runs_dir.into();
        std::fs::create_dir_all(&runs_dir)?;
        Ok(Self { runs_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.runs_dir
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(format!("{}.json", run_id))
    }

    /// Save a summary, returning the file written.
    pub fn save(&self, summary: &RunSummary) -> io::Result<PathBuf> {
        let path = self.path_for(&summary.run_id);
        storage::write_json_atomic(&path, summary)?;
        Ok(path)
    }

    pub fn load(&self, run_id: &str) -> io::Result<Option<RunSummary>> {
        storage::read_json(&self.path_for(run_id))
    }
}
