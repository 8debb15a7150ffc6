//! Response parsing for text-generation endpoints.
//!
//! Inference endpoints return generated text in a few shapes:
//!
//! - **Hugging Face pipelines**: `[{"generated_text": "..."}]` or `{"generated_text": "..."}`
//! - **Text Generation Inference**: the above plus `details.generated_tokens`
//! - **OpenAI-compatible**: `{"choices": [{"text"|"message": ..}], "usage": {..}}`
//!
//! Usage data is taken from the response when present and estimated from the
//! text otherwise.

use serde::Deserialize;
use serde_json::Value;

use crate::budget::TokenEstimator;

/// Token usage extracted from a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    /// Whether this came from the response (vs estimated)
    pub is_actual: bool,
    /// Source of the usage data (e.g. "tgi", "openai", "estimated")
    pub source: String,
}

impl ParsedTokenUsage {
    /// Create from actual reported values.
    pub fn actual(input: Option<u64>, output: u64, source: impl Into<String>) -> Self {
        Self {
            input_tokens: input,
            output_tokens: Some(output),
            is_actual: true,
            source: source.into(),
        }
    }

    /// Create from estimation.
    pub fn estimated(input: u64, output: u64) -> Self {
        Self {
            input_tokens: Some(input),
            output_tokens: Some(output),
            is_actual: false,
            source: "estimated".to_string(),
        }
    }
}

/// OpenAI-style usage block.
#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    completion_tokens: u64,
}

/// Anthropic-style usage block.
#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    output_tokens: u64,
}

/// A parsed generation response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedGeneration {
    pub text: String,
    pub usage: ParsedTokenUsage,
}

/// Extract the generated text from a response body.
///
/// Returns `None` for shapes that carry no text.
pub fn extract_text(response: &Value) -> Option<String> {
    let first = match response {
        Value::Array(items) => items.first()?,
        other => other,
    };

    if let Some(text) = first.get("generated_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }

    let choice = first.get("choices")?.as_array()?.first()?;
    choice
        .get("text")
        .and_then(Value::as_str)
        .or_else(|| {
            choice
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
}

/// Extract reported usage from a response body.
pub fn extract_usage(response: &Value) -> Option<ParsedTokenUsage> {
    let first = match response {
        Value::Array(items) => items.first()?,
        other => other,
    };

    if let Some(generated) = first
        .get("details")
        .and_then(|d| d.get("generated_tokens"))
        .and_then(Value::as_u64)
    {
        return Some(ParsedTokenUsage::actual(None, generated, "tgi"));
    }

    let usage = first.get("usage")?;
    if let Ok(openai) = serde_json::from_value::<OpenAIUsage>(usage.clone()) {
        return Some(ParsedTokenUsage::actual(
            openai.prompt_tokens,
            openai.completion_tokens,
            "openai",
        ));
    }
    if let Ok(anthropic) = serde_json::from_value::<AnthropicUsage>(usage.clone()) {
        return Some(ParsedTokenUsage::actual(
            anthropic.input_tokens,
            anthropic.output_tokens,
            "anthropic",
        ));
    }

    None
}

/// Parse a response, estimating usage when the response reports none.
pub fn parse_generation(
    response: &Value,
    prompt: &str,
    estimator: &TokenEstimator,
) -> Option<ParsedGeneration> {
    let text = extract_text(response)?;
    let usage = extract_usage(response).unwrap_or_else(|| {
        let count = estimator.estimate_interaction(prompt, &text);
        ParsedTokenUsage::estimated(count.input_tokens, count.output_tokens)
    });
    Some(ParsedGeneration { text, usage })
}
