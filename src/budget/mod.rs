//! Spend management for draftpilot.
//!
//! This module tracks API spend per calendar month and decides, per contact,
//! which model tier can be afforded.
//!
//! # Overview
//!
//! The budget system consists of:
//! - **BudgetConfig / ModelTier**: monthly limit, thresholds and per-tier pricing
//! - **UsageLedger**: durable per-month spend and call counts
//! - **ModelSelector**: picks a tier from contact importance and remaining budget
//! - **TokenEstimator**: counts tokens when the backend reports none
//!
//! # Example
//!
//! ```ignore
//! use draftpilot::budget::{BudgetConfig, Charge, Period, UsageLedger};
//!
//! let config = BudgetConfig::default().with_monthly_limit(10.0);
//! let mut ledger = UsageLedger::open_file(config, "api_usage.json")?;
//!
//! let period = Period::current();
//! if ledger.get_remaining_budget(period) >= 0.05 {
//!     ledger.record_charge(period, Charge::new(0.05))?;
//! }
//! ```

mod config;
mod estimator;
mod ledger;
mod period;
mod selector;

pub use config::{BudgetConfig, DegradePolicy, ModelTier, TierKind, TierSet};
pub use estimator::{TokenCount, TokenEstimator};
pub use ledger::{
    BudgetStatus, Charge, JsonLedgerStore, LedgerError, LedgerFile, LedgerResult, LedgerStore,
    MemoryLedgerStore, UsageLedger, UsageRecord, UsageReport, LEDGER_SCHEMA_VERSION,
};
pub use period::{InvalidPeriod, Period};
pub use selector::{ModelSelector, Selection, SelectionSkip};
