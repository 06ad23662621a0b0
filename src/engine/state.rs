// SPDX-License-Identifier: MIT

//! Shared workflow state with per-field merge rules
//!
//! A graph declares its state up front as a [`StateSchema`]: every
//! field carries a [`Reducer`] fixed at definition time. Steps return
//! sparse [`StateUpdate`]s which [`WorkflowState::apply`] folds into
//! the current state according to those reducers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// How a partial update merges into an existing field value
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    /// Replace the value; absence in an update means "no change"
    #[default]
    Overwrite,
    /// Concatenate to the end of an ordered array, no de-duplication
    Append,
}

/// Definition of a single state field
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FieldDef {
    #[serde(default)]
    pub reducer: Reducer,
    pub default: Option<Value>,
}

/// Schema defining the fields a workflow state may hold
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StateSchema {
    fields: BTreeMap<String, FieldDef>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field with the given reducer and no default
    pub fn field(self, name: &str, reducer: Reducer) -> Self {
        self.insert(name, reducer, None)
    }

    /// Declare a field with a default value applied at state creation
    pub fn field_with_default(self, name: &str, reducer: Reducer, default: Value) -> Self {
        self.insert(name, reducer, Some(default))
    }

    fn insert(mut self, name: &str, reducer: Reducer, default: Option<Value>) -> Self {
        self.fields
            .insert(name.to_string(), FieldDef { reducer, default });
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn reducer(&self, name: &str) -> Option<Reducer> {
        self.fields.get(name).map(|def| def.reducer)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldDef)> {
        self.fields.iter()
    }
}

/// A sparse update produced by one step execution
///
/// Fields absent from the update are untouched by the merge.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct StateUpdate {
    changes: BTreeMap<String, Value>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a field change, consuming and returning the update
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.changes.insert(field.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &String> {
        self.changes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.changes.iter()
    }
}

/// Runtime workflow state
///
/// Cheap to clone for handing snapshots to steps; the schema is shared
/// behind an `Arc` and never mutated after graph compilation.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    schema: Arc<StateSchema>,
    values: BTreeMap<String, Value>,
}

impl WorkflowState {
    /// Create a fresh state with schema defaults applied
    pub fn new(schema: Arc<StateSchema>) -> Self {
        let values = schema
            .fields()
            .filter_map(|(name, def)| def.default.clone().map(|v| (name.clone(), v)))
            .collect();
        Self { schema, values }
    }

    /// Rebuild a state from checkpointed values
    pub fn from_values(schema: Arc<StateSchema>, values: BTreeMap<String, Value>) -> Self {
        Self { schema, values }
    }

    /// Merge a partial update into this state
    ///
    /// Total and infallible: writes outside the schema are a
    /// definition-time error caught by the graph compiler, and an
    /// unknown field reaching this point falls back to overwrite.
    pub fn apply(&mut self, update: StateUpdate) {
        for (field, value) in update.changes {
            match self.schema.reducer(&field).unwrap_or_default() {
                Reducer::Overwrite => {
                    self.values.insert(field, value);
                }
                Reducer::Append => {
                    let slot = self
                        .values
                        .entry(field)
                        .or_insert_with(|| Value::Array(vec![]));
                    if let Value::Array(items) = slot {
                        match value {
                            Value::Array(new_items) => items.extend(new_items),
                            other => items.push(other),
                        }
                    }
                }
            }
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(|v| v.as_bool())
    }

    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.get(field).and_then(|v| v.as_u64())
    }

    pub fn get_array(&self, field: &str) -> Option<&Vec<Value>> {
        self.get(field).and_then(|v| v.as_array())
    }

    pub fn schema(&self) -> &Arc<StateSchema> {
        &self.schema
    }

    /// Field values, for checkpointing
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}
