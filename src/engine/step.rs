// SPDX-License-Identifier: MIT

//! Step trait and closure adapter
//!
//! A step reads the full state and returns a sparse update; it may
//! call external services but must not mutate state other than through
//! its returned [`StateUpdate`].

use async_trait::async_trait;
use std::future::Future;

use super::error::StepError;
use super::state::{StateUpdate, WorkflowState};

/// A named unit of work in the graph
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// State fields this step may write
    ///
    /// Checked against the schema at compile time so a step can never
    /// merge into an undeclared field.
    fn writes(&self) -> &[String];

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StepError>;
}

/// Adapter turning an async closure into a [`Step`]
///
/// The closure receives a clone of the current state, which keeps it
/// free of borrow gymnastics across the await point.
pub struct FnStep<F> {
    name: String,
    writes: Vec<String>,
    func: F,
}

impl<F, Fut> FnStep<F>
where
    F: Fn(WorkflowState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StateUpdate, StepError>> + Send,
{
    pub fn new(name: &str, writes: &[&str], func: F) -> Self {
        Self {
            name: name.to_string(),
            writes: writes.iter().map(|s| s.to_string()).collect(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> Step for FnStep<F>
where
    F: Fn(WorkflowState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StateUpdate, StepError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn writes(&self) -> &[String] {
        &self.writes
    }

    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, StepError> {
        (self.func)(state.clone()).await
    }
}
