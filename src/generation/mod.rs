//! Email body generation.
//!
//! A [`GenerationBackend`] turns a contact's context into an email body for
//! one model tier. The pipeline treats every backend failure the same way:
//! the contact is skipped and nothing is charged.

mod huggingface;
mod parser;

pub use huggingface::{HuggingFaceBackend, DEFAULT_INFERENCE_ENDPOINT};
pub use parser::{extract_text, extract_usage, parse_generation, ParsedGeneration, ParsedTokenUsage};

use async_trait::async_trait;
use thiserror::Error;

use crate::budget::{ModelTier, TierKind};
use crate::contacts::ContactRecord;

/// Errors returned by a generation backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("backend call timed out after {0}s")]
    Timeout(u64),

    #[error("backend returned no generated text")]
    EmptyResponse,

    #[error("unexpected backend response: {0}")]
    UnexpectedResponse(String),

    #[error("missing API key (set {0})")]
    MissingApiKey(String),
}

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub tier: TierKind,
    pub model: String,
    pub max_new_tokens: u32,
    pub temperature: f32,
}

impl GenerationRequest {
    /// Build the request for `contact` on the given tier.
    pub fn for_contact(
        contact: &ContactRecord,
        kind: TierKind,
        tier: &ModelTier,
        temperature: f32,
    ) -> Self {
        Self {
            prompt: build_prompt(contact),
            tier: kind,
            model: tier.model.clone(),
            max_new_tokens: tier.max_new_tokens,
            temperature,
        }
    }
}

/// Successful backend output.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub text: String,
    pub usage: ParsedTokenUsage,
    /// Cost reported by the backend, if it bills per call
    pub reported_cost: Option<f64>,
}

impl GenerationOutput {
    pub fn output_tokens(&self) -> u64 {
        self.usage.output_tokens.unwrap_or(0)
    }
}

/// A text-generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError>;
}

/// Instruction prompt for a contact's email.
pub fn build_prompt(contact: &ContactRecord) -> String {
    format!(
        "Generate a professional and concise email to {name} based on the following context:\n\
         {context}\n\n\
         The email should:\n\
         1. Start with a professional greeting addressed to {name}\n\
         2. Have a brief introduction paragraph\n\
         3. Include the main message in 2-3 paragraphs\n\
         4. End with a clear call to action\n\
         5. Have a professional sign-off\n\n\
         Write only the email body, formatted with proper spacing and paragraphs.",
        name = contact.first_name,
        context = contact.context.trim(),
    )
}
