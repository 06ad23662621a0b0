// SPDX-License-Identifier: MIT

//! Graph builder and compiler
//!
//! [`GraphBuilder`] collects steps, edges and the entry point;
//! [`GraphBuilder::compile`] validates the whole definition eagerly so
//! a malformed graph never begins executing. The compiled [`Graph`] is
//! immutable and safe to share across concurrent sessions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::edge::{Dest, Edge, RouteKey, Router};
use super::error::CompileError;
use super::state::{StateSchema, WorkflowState};
use super::step::Step;

/// Mutable graph definition under construction
pub struct GraphBuilder {
    schema: StateSchema,
    steps: HashMap<String, Arc<dyn Step>>,
    insertion_order: Vec<String>,
    edges: HashMap<String, Edge>,
    entry: Option<String>,
}

impl GraphBuilder {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            schema,
            steps: HashMap::new(),
            insertion_order: Vec::new(),
            edges: HashMap::new(),
            entry: None,
        }
    }

    /// Register a step; duplicate names are reported at compile time
    pub fn add_step(mut self, step: Arc<dyn Step>) -> Self {
        let name = step.name().to_string();
        self.insertion_order.push(name.clone());
        self.steps.insert(name, step);
        self
    }

    /// Declare a static edge from `from` to a fixed destination
    pub fn add_edge(mut self, from: &str, dest: Dest) -> Self {
        self.edges.insert(from.to_string(), Edge::Static(dest));
        self
    }

    /// Declare a conditional edge with a closed route table
    ///
    /// The router is evaluated against the post-merge state; every key
    /// it can produce must be bound here.
    pub fn add_conditional_edges<F, K>(mut self, from: &str, router: F, routes: Vec<(K, Dest)>) -> Self
    where
        F: Fn(&WorkflowState) -> RouteKey + Send + Sync + 'static,
        K: Into<RouteKey>,
    {
        let router: Router = Arc::new(router);
        let routes = routes.into_iter().map(|(k, d)| (k.into(), d)).collect();
        self.edges
            .insert(from.to_string(), Edge::Conditional { router, routes });
        self
    }

    pub fn set_entry_point(mut self, name: &str) -> Self {
        self.entry = Some(name.to_string());
        self
    }

    /// Validate the definition and produce an executable graph
    pub fn compile(self) -> Result<Graph, CompileError> {
        // Duplicate registrations
        let mut seen = std::collections::HashSet::new();
        for name in &self.insertion_order {
            if !seen.insert(name.clone()) {
                return Err(CompileError::DuplicateStep(name.clone()));
            }
        }

        let entry = self.entry.ok_or(CompileError::MissingEntryPoint)?;
        if !self.steps.contains_key(&entry) {
            return Err(CompileError::UnknownEntryPoint(entry));
        }

        // Every step needs outgoing routing
        for name in &self.insertion_order {
            if !self.edges.contains_key(name) {
                return Err(CompileError::MissingEdge(name.clone()));
            }
        }

        // Edges must come from registered steps and reach registered
        // steps or the terminal sentinel; route tables must not be empty
        for (from, edge) in &self.edges {
            if !self.steps.contains_key(from) {
                return Err(CompileError::EdgeFromUnknownStep(from.clone()));
            }
            if let Edge::Conditional { routes, .. } = edge {
                if routes.is_empty() {
                    return Err(CompileError::EmptyRouteTable(from.clone()));
                }
            }
            for dest in edge.destinations() {
                if let Some(to) = dest.step_name() {
                    if !self.steps.contains_key(to) {
                        return Err(CompileError::UnknownDestination {
                            from: from.clone(),
                            to: to.to_string(),
                        });
                    }
                }
            }
        }

        // Declared writes must exist in the schema
        for step in self.steps.values() {
            for field in step.writes() {
                if !self.schema.contains(field) {
                    return Err(CompileError::UnknownWriteField {
                        step: step.name().to_string(),
                        field: field.clone(),
                    });
                }
            }
        }

        Ok(Graph {
            schema: Arc::new(self.schema),
            steps: self.steps,
            edges: self.edges,
            entry,
        })
    }
}

/// Compiled, immutable graph
pub struct Graph {
    schema: Arc<StateSchema>,
    steps: HashMap<String, Arc<dyn Step>>,
    edges: HashMap<String, Edge>,
    entry: String,
}

impl Graph {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn schema(&self) -> &Arc<StateSchema> {
        &self.schema
    }

    pub fn step(&self, name: &str) -> Option<&Arc<dyn Step>> {
        self.steps.get(name)
    }

    pub fn edge(&self, name: &str) -> Option<&Edge> {
        self.edges.get(name)
    }

    /// Fresh state with schema defaults applied
    pub fn initial_state(&self) -> WorkflowState {
        WorkflowState::new(Arc::clone(&self.schema))
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut steps: Vec<&String> = self.steps.keys().collect();
        steps.sort();
        f.debug_struct("Graph")
            .field("entry", &self.entry)
            .field("steps", &steps)
            .field("edges", &self.edges)
            .finish()
    }
}
