// SPDX-License-Identifier: MIT

//! Sample conversational agents built on the graph engine
//!
//! - [reviewed] - answer generation gated by a judge step, with a
//!   bounded regenerate loop
//! - [gourmet] - restaurant recommendation with a re-ask loop and a
//!   lunch/dinner search fan-out
//! - [chat] - plain assistant with checkpointed history

pub mod chat;
pub mod gourmet;
pub mod reviewed;
pub mod roles;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::WorkflowState;

/// One conversation turn, stored in append-reduced message fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Read a message-list field from state, skipping malformed entries
pub fn messages(state: &WorkflowState, field: &str) -> Vec<Message> {
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

/// The most recent message with the given role, if any
pub fn last_message_from<'a>(messages: &'a [Message], role: &str) -> Option<&'a Message> {
    messages.iter().rev().find(|m| m.role == role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Reducer, StateSchema, StateUpdate};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_messages_round_trip_through_state() {
        let schema = Arc::new(StateSchema::new().field("messages", Reducer::Append));
        let mut state = WorkflowState::new(schema);
        state.apply(StateUpdate::new().set("messages", json!([Message::user("hi").to_value()])));
        state.apply(
            StateUpdate::new().set("messages", json!([Message::assistant("hello").to_value()])),
        );

        let msgs = messages(&state, "messages");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0], Message::user("hi"));
        assert_eq!(msgs[1], Message::assistant("hello"));
    }

    #[test]
    fn test_last_message_from_role() {
        let msgs = vec![
            Message::user("first"),
            Message::assistant("reply"),
            Message::user("second"),
        ];
        assert_eq!(
            last_message_from(&msgs, "user").map(|m| m.content.as_str()),
            Some("second")
        );
        assert_eq!(last_message_from(&msgs, "system"), None);
    }

    #[test]
    fn test_messages_skips_malformed_entries() {
        let schema = Arc::new(StateSchema::new().field("messages", Reducer::Append));
        let mut state = WorkflowState::new(schema);
        state.apply(StateUpdate::new().set(
            "messages",
            json!([{"role": "user", "content": "ok"}, "not a message", 42]),
        ));

        let msgs = messages(&state, "messages");
        assert_eq!(msgs.len(), 1);
    }
}
