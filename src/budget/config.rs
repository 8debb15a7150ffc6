//! Budget and model tier configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which generation tier a model belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// Cheaper model used for regular contacts
    Standard,
    /// Higher quality model preferred for VIP contacts
    Premium,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Standard => "standard",
            TierKind::Premium => "premium",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pricing and generation limits for one model.
///
/// Costs are in USD. A call costs `request_cost` plus `token_cost` for every
/// generated token. A tier with neither configured is priced by its
/// `estimated_cost` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTier {
    /// Backend model identifier
    pub model: String,
    /// Flat cost per request
    #[serde(default)]
    pub request_cost: f64,
    /// Cost per generated (output) token
    #[serde(default)]
    pub token_cost: f64,
    /// Maximum tokens the backend may generate per call
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    /// Explicit per-call estimate, replacing the computed upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
}

fn default_max_new_tokens() -> u32 {
    500
}

impl ModelTier {
    /// A tier with no pricing configured yet.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            request_cost: 0.0,
            token_cost: 0.0,
            max_new_tokens: default_max_new_tokens(),
            estimated_cost: None,
        }
    }

    /// Small default model for regular contacts.
    pub fn gpt2() -> Self {
        Self {
            model: "gpt2".to_string(),
            request_cost: 0.0001,
            token_cost: 0.00001,
            max_new_tokens: default_max_new_tokens(),
            estimated_cost: None,
        }
    }

    /// Instruction-tuned model for VIP contacts.
    pub fn mistral_instruct() -> Self {
        Self {
            model: "mistralai/Mistral-7B-Instruct-v0.2".to_string(),
            request_cost: 0.0005,
            token_cost: 0.00005,
            max_new_tokens: default_max_new_tokens(),
            estimated_cost: None,
        }
    }

    pub fn with_request_cost(mut self, cost: f64) -> Self {
        self.request_cost = cost;
        self
    }

    pub fn with_token_cost(mut self, cost: f64) -> Self {
        self.token_cost = cost;
        self
    }

    pub fn with_max_new_tokens(mut self, tokens: u32) -> Self {
        self.max_new_tokens = tokens;
        self
    }

    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = Some(cost);
        self
    }

    /// Actual cost of a call that generated `output_tokens`.
    pub fn calculate_cost(&self, output_tokens: u64) -> f64 {
        self.request_cost + output_tokens as f64 * self.token_cost
    }

    /// Whether per-request or per-token pricing is configured.
    pub fn has_pricing(&self) -> bool {
        self.request_cost > 0.0 || self.token_cost > 0.0
    }

    /// Cost to charge for a call the backend did not price itself.
    pub fn charge_for(&self, output_tokens: u64) -> f64 {
        if self.has_pricing() {
            self.calculate_cost(output_tokens)
        } else {
            self.estimated_cost()
        }
    }

    /// Worst-case cost of one call, used for admission control.
    pub fn estimated_cost(&self) -> f64 {
        self.estimated_cost
            .unwrap_or_else(|| self.calculate_cost(u64::from(self.max_new_tokens)))
    }
}

/// The two configured generation tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSet {
    pub standard: ModelTier,
    pub premium: ModelTier,
}

impl Default for TierSet {
    fn default() -> Self {
        Self {
            standard: ModelTier::gpt2(),
            premium: ModelTier::mistral_instruct(),
        }
    }
}

impl TierSet {
    pub fn new(standard: ModelTier, premium: ModelTier) -> Self {
        Self { standard, premium }
    }

    pub fn get(&self, kind: TierKind) -> &ModelTier {
        match kind {
            TierKind::Standard => &self.standard,
            TierKind::Premium => &self.premium,
        }
    }
}

/// What to do with a VIP contact when only the standard tier is affordable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradePolicy {
    /// Generate with the standard tier
    #[default]
    Downgrade,
    /// Skip the contact instead of sending a lower quality email
    Skip,
}

/// Configuration for monthly budget enforcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum spend per calendar month in USD
    pub monthly_limit: f64,

    /// Warning threshold as fraction of the monthly limit (0.0 - 1.0)
    pub warning_threshold: f64,

    /// Critical threshold as fraction of the monthly limit (0.0 - 1.0)
    pub critical_threshold: f64,

    /// Behaviour when a VIP contact cannot afford the premium tier
    pub on_degrade: DegradePolicy,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_limit: 50.0,
            warning_threshold: 0.7, // Warn at 70%
            critical_threshold: 0.9, // Critical at 90%
            on_degrade: DegradePolicy::Downgrade,
        }
    }
}

impl BudgetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the monthly limit in USD.
    pub fn with_monthly_limit(mut self, limit: f64) -> Self {
        self.monthly_limit = limit;
        self
    }

    /// Set the warning threshold.
    pub fn with_warning_threshold(mut self, threshold: f64) -> Self {
        self.warning_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the critical threshold.
    pub fn with_critical_threshold(mut self, threshold: f64) -> Self {
        self.critical_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the degrade policy.
    pub fn with_degrade_policy(mut self, policy: DegradePolicy) -> Self {
        self.on_degrade = policy;
        self
    }
}
