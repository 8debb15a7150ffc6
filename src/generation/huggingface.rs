//! Hugging Face inference API backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::parser::parse_generation;
use super::{BackendError, GenerationBackend, GenerationOutput, GenerationRequest};
use crate::budget::TokenEstimator;

/// Hosted inference API base URL.
pub const DEFAULT_INFERENCE_ENDPOINT: &str = "https://api-inference.huggingface.co/models";

#[derive(Debug, Serialize)]
struct InferencePayload<'a> {
    inputs: &'a str,
    parameters: InferenceParameters,
}

#[derive(Debug, Serialize)]
struct InferenceParameters {
    max_new_tokens: u32,
    temperature: f32,
    return_full_text: bool,
}

/// Calls `POST {endpoint}/{model}` with a bearer API key.
#[derive(Debug, Clone)]
pub struct HuggingFaceBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
    estimator: TokenEstimator,
}

impl HuggingFaceBackend {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(BackendError::MissingApiKey("HUGGINGFACE_API_KEY".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
            estimator: TokenEstimator::default(),
        })
    }

    fn model_url(&self, model: &str) -> String {
        format!("{}/{}", self.endpoint, model)
    }

    fn map_send_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout.as_secs())
        } else {
            BackendError::Http(err)
        }
    }
}

#[async_trait]
impl GenerationBackend for HuggingFaceBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError> {
        let payload = InferencePayload {
            inputs: &request.prompt,
            parameters: InferenceParameters {
                max_new_tokens: request.max_new_tokens,
                temperature: request.temperature,
                return_full_text: false,
            },
        };

        debug!(model = %request.model, tier = %request.tier, "calling inference API");
        let response = self
            .client
            .post(self.model_url(&request.model))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response.json().await.map_err(|e| self.map_send_error(e))?;
        interpret_response(&body, &request.prompt, &self.estimator)
    }
}

/// Turn a successful response body into output, rejecting empty text.
fn interpret_response(
    body: &Value,
    prompt: &str,
    estimator: &TokenEstimator,
) -> Result<GenerationOutput, BackendError> {
    let parsed = parse_generation(body, prompt, estimator).ok_or_else(|| {
        BackendError::UnexpectedResponse(body.to_string().chars().take(200).collect())
    })?;

    let text = parsed.text.trim().to_string();
    if text.is_empty() {
        return Err(BackendError::EmptyResponse);
    }

    Ok(GenerationOutput {
        text,
        usage: parsed.usage,
        reported_cost: None,
    })
}
