// SPDX-License-Identifier: MIT

//! OpenAI chat completions backend

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

use super::{GenerateRequest, LanguageModel, ModelError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// OpenAI chat completions client
///
/// Constructed once at process start and shared by reference across
/// every step that needs it.
pub struct OpenAiModel {
    client: Client,
    api_key: String,
    model_name: String,
    base_url: String,
}

impl OpenAiModel {
    /// Create a new client
    ///
    /// Requires `OPENAI_API_KEY`; `OPENAI_BASE_URL` overrides the
    /// default endpoint for proxies and compatible servers.
    pub fn new(model_name: impl Into<String>) -> Result<Self, ModelError> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| ModelError::ApiKeyMissing("openai".to_string()))?;
        let base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            model_name: model_name.into(),
            base_url,
        })
    }

    fn build_body(&self, request: &GenerateRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": self.model_name,
            "messages": messages,
        });
        if let Some(temperature) = request.config.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.config.max_output_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    async fn complete(&self, body: Value) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        log::debug!(
            "OpenAI request body: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if resp.status().as_u16() == 429 {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ModelError::RateLimited { retry_after_secs });
        }
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                provider: "openai".to_string(),
                message,
            });
        }

        let resp_json: Value = resp.json().await?;
        Self::extract_content(&resp_json)
    }

    fn extract_content(response: &Value) -> Result<String, ModelError> {
        response["choices"]
            .as_array()
            .and_then(|choices| choices.first())
            .and_then(|choice| choice["message"]["content"].as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ModelError::InvalidResponse("no message content in choices".to_string())
            })
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn generate(&self, request: GenerateRequest) -> Result<String, ModelError> {
        let body = self.build_body(&request);
        self.complete(body).await
    }

    async fn generate_structured(
        &self,
        request: GenerateRequest,
        schema: &Value,
    ) -> Result<Value, ModelError> {
        let mut body = self.build_body(&request);
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {
                "name": "structured_output",
                "schema": schema,
                "strict": true,
            }
        });

        let content = self.complete(body).await?;
        serde_json::from_str(&content)
            .map_err(|e| ModelError::InvalidResponse(format!("structured output: {}", e)))
    }
}
