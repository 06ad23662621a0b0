// SPDX-License-Identifier: MIT

//! Typed error handling for the graph engine
//!
//! Compile-time failures (malformed graph definitions) are kept apart
//! from runtime failures (step execution, routing, persistence) so
//! callers can tell "fix the graph" errors from "retry the invocation"
//! errors.

use thiserror::Error;

use super::edge::RouteKey;

/// Top-level error type returned by [`App::invoke`](super::executor::App::invoke)
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed graph definition, raised before any execution
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// A step body failed (after transient retries were exhausted, if any)
    #[error("step '{step}' failed for session '{session}': {source}")]
    Step {
        step: String,
        session: String,
        #[source]
        source: StepError,
    },

    /// A conditional router produced a key with no bound destination
    #[error("no route bound for key '{key}' out of step '{step}' (session '{session}')")]
    Unroutable {
        step: String,
        key: RouteKey,
        session: String,
    },

    /// Checkpoint load/save failure
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Graph definition errors, all raised eagerly by
/// [`GraphBuilder::compile`](super::graph::GraphBuilder::compile)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    /// The same step name was registered twice
    #[error("duplicate step name: '{0}'")]
    DuplicateStep(String),

    /// No entry point was set on the builder
    #[error("no entry point set")]
    MissingEntryPoint,

    /// The entry point does not name a registered step
    #[error("entry point '{0}' is not a registered step")]
    UnknownEntryPoint(String),

    /// A step has no outgoing edge and is not terminal-adjacent
    #[error("step '{0}' has no outgoing edge")]
    MissingEdge(String),

    /// An edge was declared from a step that was never registered
    #[error("edge declared from unknown step '{0}'")]
    EdgeFromUnknownStep(String),

    /// An edge destination names a step that was never registered
    #[error("edge from '{from}' references unknown step '{to}'")]
    UnknownDestination { from: String, to: String },

    /// A conditional edge was declared with an empty route table
    #[error("conditional edge from '{0}' declares no routes")]
    EmptyRouteTable(String),

    /// A step declares a write to a field missing from the state schema
    #[error("step '{step}' declares a write to undefined state field '{field}'")]
    UnknownWriteField { step: String, field: String },
}

/// Failure inside a step body
///
/// Transient errors (remote-service or network failure) may be retried
/// by the execution loop; fatal errors abort the run immediately.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl StepError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Checkpoint store failures
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_classification() {
        assert!(StepError::transient("timeout").is_transient());
        assert!(!StepError::fatal("bad contract").is_transient());
    }

    #[test]
    fn test_compile_error_display() {
        let err = CompileError::UnknownDestination {
            from: "check".to_string(),
            to: "retry".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "edge from 'check' references unknown step 'retry'"
        );
    }
}
