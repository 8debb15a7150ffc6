//! Monthly usage ledger: cumulative spend and call counts per calendar month.
//!
//! The ledger is loaded once, mutated in memory and flushed to its store after
//! every charge. It is the single writer of cumulative totals.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::config::BudgetConfig;
use super::period::Period;
use crate::storage;

/// Current ledger file schema version.
pub const LEDGER_SCHEMA_VERSION: u32 = 1;

/// Errors raised when the ledger cannot be read or written.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// IO error while reading or writing the ledger.
    #[error("ledger I/O error: {0}")]
    Io(#[from] io::Error),

    /// The ledger exists but cannot be parsed. Spend history would be lost
    /// by starting over, so this is never silently ignored.
    #[error("ledger at {path} is corrupt: {message}")]
    CorruptLedger { path: PathBuf, message: String },

    /// The in-memory store was poisoned by a panicking writer.
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Status of budget usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    /// Under warning threshold, all good
    Ok,
    /// Approaching budget limit (over warning threshold)
    Warning,
    /// Near budget limit (over critical threshold)
    Critical,
    /// Budget exhausted
    Exceeded,
}

impl BudgetStatus {
    /// Check if warnings should be emitted.
    pub fn should_warn(&self) -> bool {
        matches!(self, BudgetStatus::Warning | BudgetStatus::Critical)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetStatus::Ok => "OK",
            BudgetStatus::Warning => "WARNING",
            BudgetStatus::Critical => "CRITICAL",
            BudgetStatus::Exceeded => "EXCEEDED",
        }
    }
}

impl fmt::Display for BudgetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage accumulated for one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub period: Period,
    pub calls_made: u64,
    /// Total spend in USD
    pub total_cost: f64,
    /// Monthly limit in force at the last charge
    pub budget_limit: f64,
    /// Generated tokens charged this month
    #[serde(default)]
    pub output_tokens: u64,
    /// Paid calls per backend model
    #[serde(default)]
    pub models: BTreeMap<String, u64>,
    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    fn new(period: Period, budget_limit: f64) -> Self {
        Self {
            period,
            calls_made: 0,
            total_cost: 0.0,
            budget_limit,
            output_tokens: 0,
            models: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// A single charge to record against a period.
#[derive(Debug, Clone, PartialEq)]
pub struct Charge {
    /// Cost in USD
    pub cost: f64,
    /// Number of paid calls covered by this charge
    pub calls: u64,
    /// Model that served the calls
    pub model: Option<String>,
    /// Generated tokens billed
    pub output_tokens: u64,
}

impl Charge {
    /// A charge for one call.
    pub fn new(cost: f64) -> Self {
        Self {
            cost,
            calls: 1,
            model: None,
            output_tokens: 0,
        }
    }

    pub fn with_calls(mut self, calls: u64) -> Self {
        self.calls = calls;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_output_tokens(mut self, tokens: u64) -> Self {
        self.output_tokens = tokens;
        self
    }
}

/// On-disk ledger document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerFile {
    pub schema_version: u32,
    pub monthly_usage: BTreeMap<Period, UsageRecord>,
    /// All-time spend in USD
    pub total_cost: f64,
    /// All-time paid calls
    pub total_requests: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for LedgerFile {
    fn default() -> Self {
        Self {
            schema_version: LEDGER_SCHEMA_VERSION,
            monthly_usage: BTreeMap::new(),
            total_cost: 0.0,
            total_requests: 0,
            last_updated: Utc::now(),
        }
    }
}

/// Durable backing store for the ledger document.
pub trait LedgerStore: Send + Sync {
    /// Load the ledger, `None` if it has never been written.
    fn load(&self) -> LedgerResult<Option<LedgerFile>>;

    /// Persist the full ledger.
    fn save(&self, ledger: &LedgerFile) -> LedgerResult<()>;

    /// Human readable location for logs.
    fn describe(&self) -> String;
}

/// Human-inspectable JSON ledger file.
#[derive(Debug, Clone)]
pub struct JsonLedgerStore {
    path: PathBuf,
}

impl JsonLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for JsonLedgerStore {
    fn load(&self) -> LedgerResult<Option<LedgerFile>> {
        storage::read_json(&self.path).map_err(|err| {
            if err.kind() == io::ErrorKind::InvalidData {
                LedgerError::CorruptLedger {
                    path: self.path.clone(),
                    message: err.to_string(),
                }
            } else {
                LedgerError::Io(err)
            }
        })
    }

    fn save(&self, ledger: &LedgerFile) -> LedgerResult<()> {
        storage::ensure_parent_dir(&self.path)?;
        storage::write_json_atomic(&self.path, ledger)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Volatile store used for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    inner: Arc<Mutex<Option<LedgerFile>>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the last saved document.
    pub fn snapshot(&self) -> Option<LedgerFile> {
        self.inner.lock().ok().and_then(|guard| guard.clone())
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self) -> LedgerResult<Option<LedgerFile>> {
        self.inner
            .lock()
            .map(|guard| guard.clone())
            .map_err(|e| LedgerError::Unavailable(e.to_string()))
    }

    fn save(&self, ledger: &LedgerFile) -> LedgerResult<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        *guard = Some(ledger.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Monthly spend ledger.
pub struct UsageLedger {
    config: BudgetConfig,
    store: Box<dyn LedgerStore>,
    file: LedgerFile,
}

impl fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsageLedger")
            .field("config", &self.config)
            .field("store", &self.store.describe())
            .field("file", &self.file)
            .finish()
    }
}

impl UsageLedger {
    /// Load the ledger from `store`, starting empty if it was never written.
    pub fn open(config: BudgetConfig, store: Box<dyn LedgerStore>) -> LedgerResult<Self> {
        let file = match store.load()? {
            Some(file) => {
                debug!(
                    store = %store.describe(),
                    months = file.monthly_usage.len(),
                    "loaded usage ledger"
                );
                file
            }
            None => {
                debug!(store = %store.describe(), "starting new usage ledger");
                LedgerFile::default()
            }
        };
        Ok(Self {
            config,
            store,
            file,
        })
    }

    /// Open a JSON ledger file.
    pub fn open_file(config: BudgetConfig, path: impl Into<PathBuf>) -> LedgerResult<Self> {
        Self::open(config, Box::new(JsonLedgerStore::new(path)))
    }

    /// A ledger that never touches the filesystem.
    pub fn in_memory(config: BudgetConfig) -> Self {
        Self {
            config,
            store: Box::new(MemoryLedgerStore::new()),
            file: LedgerFile::default(),
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Usage recorded for `period`, if any.
    pub fn usage(&self, period: Period) -> Option<&UsageRecord> {
        self.file.monthly_usage.get(&period)
    }

    /// Spend recorded for `period`.
    pub fn spent(&self, period: Period) -> f64 {
        self.usage(period).map(|u| u.total_cost).unwrap_or(0.0)
    }

    /// Monthly limit minus spend for `period`, never negative.
    pub fn get_remaining_budget(&self, period: Period) -> f64 {
        (self.config.monthly_limit - self.spent(period)).max(0.0)
    }

    /// Record a charge and flush it.
    ///
    /// The charge is applied in memory before the flush, so a failed write
    /// still leaves the in-process totals correct for the final flush attempt.
    pub fn record_charge(&mut self, period: Period, charge: Charge) -> LedgerResult<()> {
        let cost = charge.cost.max(0.0);
        let now = Utc::now();
        let limit = self.config.monthly_limit;

        let record = self
            .file
            .monthly_usage
            .entry(period)
            .or_insert_with(|| UsageRecord::new(period, limit));
        record.calls_made += charge.calls;
        record.total_cost += cost;
        record.budget_limit = limit;
        record.output_tokens += charge.output_tokens;
        if let Some(model) = &charge.model {
            *record.models.entry(model.clone()).or_insert(0) += charge.calls;
        }
        record.updated_at = now;

        self.file.total_cost += cost;
        self.file.total_requests += charge.calls;
        self.file.last_updated = now;

        debug!(%period, cost, calls = charge.calls, "recorded charge");

        let before = self.status_for(self.spent(period) - cost);
        let after = self.status(period);
        if after != before && after != BudgetStatus::Ok {
            warn!(
                %period,
                status = %after,
                spent = self.spent(period),
                limit,
                "monthly budget status changed"
            );
        }

        self.flush()
    }

    /// Write the current ledger to its store.
    pub fn flush(&self) -> LedgerResult<()> {
        self.store.save(&self.file)
    }

    /// Check budget status for `period`.
    pub fn status(&self, period: Period) -> BudgetStatus {
        self.status_for(self.spent(period))
    }

    fn status_for(&self, spent: f64) -> BudgetStatus {
        if self.config.monthly_limit <= 0.0 {
            return BudgetStatus::Exceeded;
        }
        let usage = spent / self.config.monthly_limit;
        if usage >= 1.0 {
            BudgetStatus::Exceeded
        } else if usage >= self.config.critical_threshold {
            BudgetStatus::Critical
        } else if usage >= self.config.warning_threshold {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Ok
        }
    }

    /// Build a usage report for `period`.
    pub fn report(&self, period: Period) -> UsageReport {
        let usage = self.usage(period);
        UsageReport {
            period,
            requests: usage.map(|u| u.calls_made).unwrap_or(0),
            cost: self.spent(period),
            budget_limit: self.config.monthly_limit,
            remaining: self.get_remaining_budget(period),
            output_tokens: usage.map(|u| u.output_tokens).unwrap_or(0),
            models: usage.map(|u| u.models.clone()).unwrap_or_default(),
            status: self.status(period),
            all_time_cost: self.file.total_cost,
            all_time_requests: self.file.total_requests,
        }
    }
}

/// Usage summary for one month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub period: Period,
    pub requests: u64,
    pub cost: f64,
    pub budget_limit: f64,
    pub remaining: f64,
    pub output_tokens: u64,
    pub models: BTreeMap<String, u64>,
    pub status: BudgetStatus,
    pub all_time_cost: f64,
    pub all_time_requests: u64,
}

impl UsageReport {
    /// Format as a human-readable string.
    pub fn format(&self) -> String {
        let mut output = String::from("===== API Usage Report =====\n");
        output.push_str(&format!("Month: {}\n", self.period));
        output.push_str(&format!("Requests: {}\n", self.requests));
        output.push_str(&format!(
            "Cost: ${:.4} / ${:.2} [{}]\n",
            self.cost, self.budget_limit, self.status
        ));
        output.push_str(&format!("Budget Remaining: ${:.4}\n", self.remaining));
        output.push_str(&format!("Output Tokens: {}\n", self.output_tokens));
        for (model, calls) in &self.models {
            output.push_str(&format!("  {}: {} calls\n", model, calls));
        }
        output.push_str(&format!(
            "All Time: {} requests, ${:.4}\n",
            self.all_time_requests, self.all_time_cost
        ));
        output.push_str("============================\n");
        output
    }
}
