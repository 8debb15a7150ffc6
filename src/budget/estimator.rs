//! Fallback token counting.
//!
//! Some inference endpoints return generated text without usage data. Tokens
//! are then approximated as whitespace-separated words so a charge can still
//! be recorded against the ledger.

use serde::{Deserialize, Serialize};

/// Word-based token estimator.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenEstimator;

impl TokenEstimator {
    pub fn estimate(&self, text: &str) -> u64 {
        text.split_whitespace().count() as u64
    }

    /// Prompt and output counts for one generation call.
    pub fn estimate_interaction(&self, prompt: &str, output: &str) -> TokenCount {
        TokenCount {
            input_tokens: self.estimate(prompt),
            output_tokens: self.estimate(output),
        }
    }
}

/// Input and output tokens of one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
