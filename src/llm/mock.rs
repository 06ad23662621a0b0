// SPDX-License-Identifier: MIT

//! Scripted model for tests and offline runs

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{GenerateRequest, LanguageModel, ModelError};

/// Returns predefined responses in order, then repeats the last one
///
/// Structured calls parse the scripted string as JSON, so one script
/// can drive a mixed graph of text and structured steps.
pub struct MockModel {
    responses: Vec<String>,
    response_index: AtomicUsize,
}

impl MockModel {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: responses.into_iter().map(|s| s.to_string()).collect(),
            response_index: AtomicUsize::new(0),
        }
    }

    fn next_response(&self) -> Result<String, ModelError> {
        if self.responses.is_empty() {
            return Err(ModelError::InvalidResponse(
                "mock model has no scripted responses".to_string(),
            ));
        }
        let idx = self.response_index.fetch_add(1, Ordering::SeqCst);
        let idx = idx.min(self.responses.len() - 1);
        Ok(self.responses[idx].clone())
    }

    /// Number of calls made so far
    pub fn calls(&self) -> usize {
        self.response_index.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn generate(&self, _request: GenerateRequest) -> Result<String, ModelError> {
        self.next_response()
    }

    async fn generate_structured(
        &self,
        _request: GenerateRequest,
        _schema: &Value,
    ) -> Result<Value, ModelError> {
        let text = self.next_response()?;
        serde_json::from_str(&text)
            .map_err(|e| ModelError::InvalidResponse(format!("scripted response: {}", e)))
    }
}
