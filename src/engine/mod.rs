// SPDX-License-Identifier: MIT

//! Graph execution engine
//!
//! The orchestration substrate for the sample agents: shared typed
//! state with per-field merge rules, static and conditional routing,
//! eager graph validation, per-session durable checkpoints, and a
//! sequential execution loop with bounded transient retries.

pub mod checkpoint;
pub mod edge;
pub mod error;
pub mod executor;
pub mod graph;
pub mod state;
pub mod step;

pub use checkpoint::{Checkpoint, Checkpointer, FileSaver, MemorySaver, RunStatus};
pub use edge::{Dest, Edge, RouteKey};
pub use error::{CompileError, EngineError, PersistenceError, StepError};
pub use executor::{App, RetryPolicy, RunResult};
pub use graph::{Graph, GraphBuilder};
pub use state::{Reducer, StateSchema, StateUpdate, WorkflowState};
pub use step::{FnStep, Step};
