// SPDX-License-Identifier: MIT

//! strand-rs: a graph-based workflow runtime for conversational agents
//!
//! The [engine] module is the core: a compiled graph of named steps
//! over shared state with per-field merge rules, conditional routing
//! evaluated on post-merge state, and per-session durable checkpoints
//! so any run can be resumed. [llm] and [tools] wrap the external
//! collaborators, and [agents] wires three sample bots out of them.

pub mod agents;
pub mod engine;
pub mod llm;
pub mod tools;
