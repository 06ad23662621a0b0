// SPDX-License-Identifier: MIT

//! Reviewed-answer agent
//!
//! Three steps in a loop: `selection` picks the answering persona,
//! `answering` generates the reply, `check` judges it. A rejected
//! answer routes back to `selection` for another round; an attempt
//! counter bounds the loop so a persistently rejecting judge cannot
//! spin forever.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{last_message_from, messages, Message};
use crate::agents::roles::RoleCatalog;
use crate::engine::{
    CompileError, Dest, Graph, GraphBuilder, Reducer, StateSchema, StateUpdate, StepError, Step,
    WorkflowState,
};
use crate::llm::{GenerateRequest, LanguageModel};

/// Regeneration rounds before the run gives up and returns the last
/// answer with its rejection reason
pub const MAX_ATTEMPTS: u64 = 3;

static JUDGEMENT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "judge": {
                "type": "boolean",
                "description": "true when the answer passes the quality check"
            },
            "reason": {
                "type": "string",
                "description": "why the answer passed or failed"
            }
        },
        "required": ["judge", "reason"],
        "additionalProperties": false
    })
});

#[derive(Debug, Deserialize)]
struct Judgement {
    judge: bool,
    reason: String,
}

fn state_schema() -> StateSchema {
    StateSchema::new()
        .field_with_default("query", Reducer::Overwrite, json!(""))
        .field_with_default("messages", Reducer::Append, json!([]))
        .field_with_default("current_role", Reducer::Overwrite, json!(""))
        .field_with_default("approved", Reducer::Overwrite, json!(false))
        .field_with_default("judgement_reason", Reducer::Overwrite, json!(""))
        .field_with_default("attempts", Reducer::Overwrite, json!(0))
}

/// Seed one user turn; resets the review bookkeeping for the new query
pub fn user_input(query: &str) -> StateUpdate {
    StateUpdate::new()
        .set("query", query)
        .set("messages", json!([Message::user(query).to_value()]))
        .set("approved", false)
        .set("judgement_reason", "")
        .set("attempts", 0)
}

struct SelectionStep {
    model: Arc<dyn LanguageModel>,
    catalog: Arc<RoleCatalog>,
    writes: Vec<String>,
}

#[async_trait]
impl Step for SelectionStep {
    fn name(&self) -> &str {
        "selection"
    }

    fn writes(&self) -> &[String] {
        &self.writes
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StepError> {
        let query = state.get_str("query").unwrap_or("");
        let prompt = format!(
            "Analyze the question and pick the most suitable answering role.\n\n\
             Options:\n{}\n\n\
             Reply with the option number only.\n\n\
             Question: {}",
            self.catalog.options_text(),
            query
        );

        let choice = self
            .model
            .generate(
                GenerateRequest::new(prompt)
                    .with_temperature(0.0)
                    .with_max_output_tokens(3),
            )
            .await
            .map_err(StepError::from)?;

        let key = choice.trim();
        let role = self.catalog.get(key).ok_or_else(|| {
            // The model wandered off the numbered options; worth a retry.
            StepError::transient(format!("model picked unknown role '{}'", key))
        })?;

        let attempts = state.get_u64("attempts").unwrap_or(0) + 1;
        Ok(StateUpdate::new()
            .set("current_role", role.name.clone())
            .set("attempts", attempts))
    }
}

struct AnsweringStep {
    model: Arc<dyn LanguageModel>,
    catalog: Arc<RoleCatalog>,
    writes: Vec<String>,
}

#[async_trait]
impl Step for AnsweringStep {
    fn name(&self) -> &str {
        "answering"
    }

    fn writes(&self) -> &[String] {
        &self.writes
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StepError> {
        let role = state.get_str("current_role").unwrap_or("Generalist");
        let history = messages(state, "messages");
        let question = last_message_from(&history, "user")
            .map(|m| m.content.as_str())
            .or_else(|| state.get_str("query"))
            .unwrap_or("");

        let prompt = format!(
            "Answer the question below in a way that fits your role.\n\n\
             Role details:\n{}\n\n\
             Question: {}\n\nAnswer:",
            self.catalog.details_text(),
            question
        );

        let answer = self
            .model
            .generate(GenerateRequest::new(prompt).with_system(format!("You are a {}.", role)))
            .await
            .map_err(StepError::from)?;

        Ok(StateUpdate::new().set("messages", json!([Message::assistant(answer).to_value()])))
    }
}

struct CheckStep {
    model: Arc<dyn LanguageModel>,
    writes: Vec<String>,
}

#[async_trait]
impl Step for CheckStep {
    fn name(&self) -> &str {
        "check"
    }

    fn writes(&self) -> &[String] {
        &self.writes
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StepError> {
        let query = state.get_str("query").unwrap_or("");
        let history = messages(state, "messages");
        let answer = last_message_from(&history, "assistant")
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let prompt = format!(
            "Check the quality of the answer. Return judge=false when \
             there is a problem, judge=true otherwise, and explain the \
             reason either way.\n\n\
             User question: {}\nAnswer: {}",
            query, answer
        );

        let verdict = self
            .model
            .generate_structured(
                GenerateRequest::new(prompt).with_temperature(0.0),
                &JUDGEMENT_SCHEMA,
            )
            .await
            .map_err(StepError::from)?;
        let judgement: Judgement = serde_json::from_value(verdict)
            .map_err(|e| StepError::transient(format!("judgement did not match schema: {}", e)))?;

        Ok(StateUpdate::new()
            .set("approved", judgement.judge)
            .set("judgement_reason", judgement.reason))
    }
}

/// Build the selection -> answering -> check graph
pub fn build_graph(
    model: Arc<dyn LanguageModel>,
    catalog: Arc<RoleCatalog>,
) -> Result<Graph, CompileError> {
    let writes = |fields: &[&str]| fields.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    GraphBuilder::new(state_schema())
        .add_step(Arc::new(SelectionStep {
            model: Arc::clone(&model),
            catalog: Arc::clone(&catalog),
            writes: writes(&["current_role", "attempts"]),
        }))
        .add_step(Arc::new(AnsweringStep {
            model: Arc::clone(&model),
            catalog,
            writes: writes(&["messages"]),
        }))
        .add_step(Arc::new(CheckStep {
            model,
            writes: writes(&["approved", "judgement_reason"]),
        }))
        .set_entry_point("selection")
        .add_edge("selection", Dest::step("answering"))
        .add_edge("answering", Dest::step("check"))
        .add_conditional_edges(
            "check",
            |state: &WorkflowState| {
                let approved = state.get_bool("approved").unwrap_or(false);
                let attempts = state.get_u64("attempts").unwrap_or(0);
                (approved || attempts >= MAX_ATTEMPTS).into()
            },
            vec![(true, Dest::End), (false, Dest::step("selection"))],
        )
        .compile()
}
