// SPDX-License-Identifier: MIT

//! Language model collaborator
//!
//! Steps treat the model as an opaque function: free text via
//! [`LanguageModel::generate`], or a schema-constrained JSON object via
//! [`LanguageModel::generate_structured`] where a step needs a typed
//! verdict instead of prose.
//!
//! Implementations:
//! - [openai] - OpenAI's chat completions API
//! - [mock] - scripted responses for tests

pub mod mock;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::engine::StepError;

/// Generation parameters a step may tune per call
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

/// One prompt invocation
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub config: GenerationConfig,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.config.max_output_tokens = Some(max);
        self
    }
}

/// Core trait for text-generation backends
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Free-text completion
    async fn generate(&self, request: GenerateRequest) -> Result<String, ModelError>;

    /// Completion constrained to a JSON schema, parsed into a value
    async fn generate_structured(
        &self,
        request: GenerateRequest,
        schema: &Value,
    ) -> Result<Value, ModelError>;
}

/// Model-specific errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// API key not configured
    #[error("API key not configured for provider: {0}")]
    ApiKeyMissing(String),

    /// Non-success response from the provider
    #[error("{provider} API error: {message}")]
    Api { provider: String, message: String },

    /// Rate limit exceeded
    #[error("rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Response did not match the expected shape or schema
    #[error("invalid response from model: {0}")]
    InvalidResponse(String),

    /// Transport-level failure
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl From<ModelError> for StepError {
    fn from(err: ModelError) -> Self {
        match err {
            // Missing credentials never heal on retry.
            ModelError::ApiKeyMissing(_) => StepError::fatal(err.to_string()),
            // Network, rate-limit, API and malformed-output errors are
            // all worth another attempt.
            other => StepError::transient(other.to_string()),
        }
    }
}
