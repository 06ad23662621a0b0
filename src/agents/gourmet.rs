// SPDX-License-Identifier: MIT

//! Gourmet recommendation agent
//!
//! `parse` extracts the search area from free text and notes a
//! clarifying question when it is missing; `fetch` fans out a lunch
//! and a dinner search; `respond` either asks the pending question
//! (suspending the session until the user replies) or summarizes the
//! results, leading with "not found" notes for empty segments.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::engine::{
    CompileError, Dest, Graph, GraphBuilder, Reducer, StateSchema, StateUpdate, StepError, Step,
    WorkflowState,
};
use crate::llm::{GenerateRequest, LanguageModel};
use crate::tools::gourmet::{GourmetSearch, Restaurant, SearchQuery};

static AREA_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "area": {
                "type": ["string", "null"],
                "description": "place or station name mentioned by the user, null when absent"
            }
        },
        "required": ["area"],
        "additionalProperties": false
    })
});

fn state_schema() -> StateSchema {
    StateSchema::new()
        .field_with_default("user_query", Reducer::Overwrite, json!(""))
        .field("area", Reducer::Overwrite)
        .field("pending_question", Reducer::Overwrite)
        .field_with_default("awaiting_input", Reducer::Overwrite, json!(false))
        .field_with_default("lunch_hits", Reducer::Append, json!([]))
        .field_with_default("dinner_hits", Reducer::Append, json!([]))
        .field_with_default("response_text", Reducer::Overwrite, json!(""))
}

/// Seed one user turn
pub fn user_input(query: &str) -> StateUpdate {
    StateUpdate::new()
        .set("user_query", query)
        .set("awaiting_input", false)
}

/// Read a restaurant-list field back out of state
pub fn restaurants(state: &WorkflowState, field: &str) -> Vec<Restaurant> {
    state
        .get_array(field)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

struct ParseStep {
    model: Arc<dyn LanguageModel>,
    writes: Vec<String>,
}

#[async_trait]
impl Step for ParseStep {
    fn name(&self) -> &str {
        "parse"
    }

    fn writes(&self) -> &[String] {
        &self.writes
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StepError> {
        let query = state.get_str("user_query").unwrap_or("");
        let request = GenerateRequest::new(query.to_string())
            .with_system(
                "You parse input for a restaurant recommendation bot. \
                 Extract only the place or station name (area) from the \
                 user's message as JSON.",
            )
            .with_temperature(0.0);

        let parsed = self
            .model
            .generate_structured(request, &AREA_SCHEMA)
            .await
            .map_err(StepError::from)?;

        match parsed["area"].as_str().filter(|s| !s.trim().is_empty()) {
            Some(area) => Ok(StateUpdate::new()
                .set("area", area.trim())
                .set("pending_question", Value::Null)),
            None => Ok(StateUpdate::new().set(
                "pending_question",
                "Which area or station should I search around?",
            )),
        }
    }
}

struct FetchStep {
    search: Arc<dyn GourmetSearch>,
    writes: Vec<String>,
}

#[async_trait]
impl Step for FetchStep {
    fn name(&self) -> &str {
        "fetch"
    }

    fn writes(&self) -> &[String] {
        &self.writes
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StepError> {
        if state.get_str("pending_question").is_some() {
            // Still waiting on the user; nothing to search yet.
            return Ok(StateUpdate::new());
        }
        let area = state
            .get_str("area")
            .ok_or_else(|| StepError::fatal("fetch reached without an area"))?;

        let lunch_query = SearchQuery::new(area, true);
        let dinner_query = SearchQuery::new(area, false);
        let (lunch, dinner) = futures::future::try_join(
            self.search.search(&lunch_query),
            self.search.search(&dinner_query),
        )
        .await
        .map_err(StepError::from)?;

        log::info!(
            "fetch: {} lunch and {} dinner hits around '{}'",
            lunch.len(),
            dinner.len(),
            area
        );

        let to_values = |hits: Vec<Restaurant>| -> Result<Value, StepError> {
            serde_json::to_value(hits).map_err(|e| StepError::fatal(e.to_string()))
        };
        Ok(StateUpdate::new()
            .set("lunch_hits", to_values(lunch)?)
            .set("dinner_hits", to_values(dinner)?))
    }
}

struct RespondStep {
    model: Arc<dyn LanguageModel>,
    writes: Vec<String>,
}

impl RespondStep {
    fn format_hits(label: &str, hits: &[Restaurant]) -> String {
        let lines = hits
            .iter()
            .map(|r| {
                let budget = if r.budget.is_empty() {
                    "no budget info"
                } else {
                    &r.budget
                };
                format!(
                    "- {} | {} | {} | {} | {}",
                    r.name, r.genre, budget, r.address, r.url
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!("[{}]\n{}", label, lines)
    }
}

#[async_trait]
impl Step for RespondStep {
    fn name(&self) -> &str {
        "respond"
    }

    fn writes(&self) -> &[String] {
        &self.writes
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StepError> {
        if let Some(question) = state.get_str("pending_question") {
            return Ok(StateUpdate::new()
                .set("response_text", question)
                .set("awaiting_input", true)
                .set("pending_question", Value::Null));
        }

        let area = state.get_str("area").unwrap_or("the requested area");
        let lunch = restaurants(state, "lunch_hits");
        let dinner = restaurants(state, "dinner_hits");

        // Empty segments are reported up front, before any summary.
        let mut notes = Vec::new();
        if lunch.is_empty() {
            notes.push(format!("No lunch spots found around {}.", area));
        }
        if dinner.is_empty() {
            notes.push(format!("No dinner spots found around {}.", area));
        }

        let response = if lunch.is_empty() && dinner.is_empty() {
            let mut text = notes.join("\n");
            text.push_str("\nWould you like to try a different area?");
            text
        } else {
            let mut sections = Vec::new();
            if !lunch.is_empty() {
                sections.push(Self::format_hits("lunch", &lunch));
            }
            if !dinner.is_empty() {
                sections.push(Self::format_hits("dinner", &dinner));
            }
            let prompt = format!(
                "Recommend restaurants around the area below.\n\n\
                 Area: {}\n\nSearch results:\n{}\n\n\
                 Pick up to five highlights and summarize each with its \
                 address, genre, budget and reservation URL.\n\
                 Powered by the HotPepper gourmet web service.",
                area,
                sections.join("\n\n")
            );
            let summary = self
                .model
                .generate(
                    GenerateRequest::new(prompt)
                        .with_system("You are a friendly restaurant guide.")
                        .with_temperature(0.3),
                )
                .await
                .map_err(StepError::from)?;

            if notes.is_empty() {
                summary
            } else {
                format!("{}\n{}", notes.join("\n"), summary)
            }
        };

        Ok(StateUpdate::new()
            .set("response_text", response)
            .set("awaiting_input", false)
            .set("pending_question", Value::Null))
    }
}

/// Build the parse -> fetch -> respond graph
pub fn build_graph(
    model: Arc<dyn LanguageModel>,
    search: Arc<dyn GourmetSearch>,
) -> Result<Graph, CompileError> {
    let writes = |fields: &[&str]| fields.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    GraphBuilder::new(state_schema())
        .add_step(Arc::new(ParseStep {
            model: Arc::clone(&model),
            writes: writes(&["area", "pending_question"]),
        }))
        .add_step(Arc::new(FetchStep {
            search,
            writes: writes(&["lunch_hits", "dinner_hits"]),
        }))
        .add_step(Arc::new(RespondStep {
            model,
            writes: writes(&["response_text", "awaiting_input", "pending_question"]),
        }))
        .set_entry_point("parse")
        .add_edge("parse", Dest::step("fetch"))
        .add_edge("fetch", Dest::step("respond"))
        .add_conditional_edges(
            "respond",
            |state: &WorkflowState| state.get_bool("awaiting_input").unwrap_or(false).into(),
            // Asking a clarifying question suspends the run; the next
            // invoke re-parses the fresh user message.
            vec![(true, Dest::wait("parse")), (false, Dest::End)],
        )
        .compile()
}
