//! Budget-aware model tier selection.
//!
//! The selector turns a contact's importance and the remaining monthly budget
//! into a decision. Skips and downgrades are expected outcomes, so they are
//! returned as values rather than errors.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::config::{DegradePolicy, TierKind, TierSet};
use crate::contacts::{ContactRecord, Importance};

/// Why a contact could not be given a tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionSkip {
    /// No tier fits in the remaining budget
    BudgetExceeded { remaining: f64, required: f64 },
    /// Only a downgrade was affordable and the policy forbids it
    DegradeRefused { remaining: f64, required: f64 },
}

impl fmt::Display for SelectionSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionSkip::BudgetExceeded {
                remaining,
                required,
            } => write!(
                f,
                "budget exceeded: ${:.4} remaining, ${:.4} required",
                remaining, required
            ),
            SelectionSkip::DegradeRefused {
                remaining,
                required,
            } => write!(
                f,
                "premium tier unaffordable (${:.4} remaining, ${:.4} required) and downgrade disabled",
                remaining, required
            ),
        }
    }
}

/// Outcome of tier selection for one contact.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Generate with the preferred tier
    Proceed(TierKind),
    /// Generate with a cheaper tier than preferred (BudgetDegraded)
    Degrade(TierKind),
    /// Do not generate
    Skip(SelectionSkip),
}

/// Chooses a generation tier per contact.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    tiers: TierSet,
    on_degrade: DegradePolicy,
}

impl ModelSelector {
    pub fn new(tiers: TierSet, on_degrade: DegradePolicy) -> Self {
        Self { tiers, on_degrade }
    }

    pub fn tiers(&self) -> &TierSet {
        &self.tiers
    }

    /// Select a tier for `contact` given `remaining_budget` (USD).
    pub fn select(&self, contact: &ContactRecord, remaining_budget: f64) -> Selection {
        let standard_cost = self.tiers.standard.estimated_cost();
        let premium_cost = self.tiers.premium.estimated_cost();

        if contact.importance == Importance::Vip && !self.tiers_equivalent() {
            if remaining_budget >= premium_cost {
                return Selection::Proceed(TierKind::Premium);
            }
            if remaining_budget < standard_cost {
                return Selection::Skip(SelectionSkip::BudgetExceeded {
                    remaining: remaining_budget,
                    required: standard_cost,
                });
            }
            return match self.on_degrade {
                DegradePolicy::Downgrade => Selection::Degrade(TierKind::Standard),
                DegradePolicy::Skip => Selection::Skip(SelectionSkip::DegradeRefused {
                    remaining: remaining_budget,
                    required: premium_cost,
                }),
            };
        }

        if remaining_budget >= standard_cost {
            Selection::Proceed(TierKind::Standard)
        } else {
            Selection::Skip(SelectionSkip::BudgetExceeded {
                remaining: remaining_budget,
                required: standard_cost,
            })
        }
    }

    /// Both tiers resolve to the same model at the same price.
    fn tiers_equivalent(&self) -> bool {
        self.tiers.standard.model == self.tiers.premium.model
            && self.tiers.standard.estimated_cost() == self.tiers.premium.estimated_cost()
    }
}
