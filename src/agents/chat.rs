// SPDX-License-Identifier: MIT

//! Plain chat agent
//!
//! A single model step over an append-reduced message history. The
//! checkpoint is what makes this interesting: every invoke for a
//! session sees the whole prior conversation.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::{messages, Message};
use crate::engine::{
    CompileError, Dest, Graph, GraphBuilder, Reducer, StateSchema, StateUpdate, StepError, Step,
    WorkflowState,
};
use crate::llm::{GenerateRequest, LanguageModel};

fn state_schema() -> StateSchema {
    StateSchema::new().field_with_default("messages", Reducer::Append, json!([]))
}

/// Seed one user turn
pub fn user_input(text: &str) -> StateUpdate {
    StateUpdate::new().set("messages", json!([Message::user(text).to_value()]))
}

/// The latest assistant reply, if any
pub fn last_reply(state: &WorkflowState) -> Option<String> {
    let history = messages(state, "messages");
    super::last_message_from(&history, "assistant").map(|m| m.content.clone())
}

struct ModelStep {
    model: Arc<dyn LanguageModel>,
    writes: Vec<String>,
}

#[async_trait]
impl Step for ModelStep {
    fn name(&self) -> &str {
        "model"
    }

    fn writes(&self) -> &[String] {
        &self.writes
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StepError> {
        let history = messages(state, "messages");
        let transcript = history
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let reply = self
            .model
            .generate(
                GenerateRequest::new(transcript)
                    .with_system("You are a capable assistant. Show your reasoning briefly."),
            )
            .await
            .map_err(StepError::from)?;

        Ok(StateUpdate::new().set("messages", json!([Message::assistant(reply).to_value()])))
    }
}

/// Build the single-step chat graph
pub fn build_graph(model: Arc<dyn LanguageModel>) -> Result<Graph, CompileError> {
    GraphBuilder::new(state_schema())
        .add_step(Arc::new(ModelStep {
            model,
            writes: vec!["messages".to_string()],
        }))
        .set_entry_point("model")
        .add_edge("model", Dest::End)
        .compile()
}
