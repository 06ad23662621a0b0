// SPDX-License-Identifier: MIT

//! Execution loop
//!
//! [`App`] drives a compiled graph for one session at a time:
//! execute the current step, merge its output, persist the checkpoint,
//! resolve the next step, repeat. Transient step failures are retried
//! up to the configured bound; fatal failures leave the checkpoint at
//! the last successfully merged state so the session can be resumed or
//! inspected later.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::checkpoint::{Checkpoint, Checkpointer, RunStatus};
use super::edge::Dest;
use super::error::{EngineError, StepError};
use super::graph::Graph;
use super::state::{StateUpdate, WorkflowState};
use super::step::Step;

/// Bound on transient retries of a single step
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per step, including the first
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Outcome of one invocation
#[derive(Debug)]
pub struct RunResult {
    pub state: WorkflowState,
    pub status: RunStatus,
}

/// A compiled graph bound to a checkpoint store, ready to invoke
pub struct App {
    graph: Arc<Graph>,
    checkpointer: Arc<dyn Checkpointer>,
    retry: RetryPolicy,
    keep_finished: bool,
    leases: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl App {
    pub fn new(graph: Graph, checkpointer: Arc<dyn Checkpointer>) -> Self {
        Self {
            graph: Arc::new(graph),
            checkpointer,
            retry: RetryPolicy::default(),
            keep_finished: true,
            leases: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Whether a terminated session's checkpoint is retained (default)
    /// or deleted on completion
    pub fn with_keep_finished(mut self, keep: bool) -> Self {
        self.keep_finished = keep;
        self
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Run the graph for a session until it terminates, suspends or fails
    ///
    /// `input` seeds or augments the state through the normal per-field
    /// merge rules before the first step executes. Concurrent invokes
    /// for the same session id serialize behind a per-session lease;
    /// different sessions run independently against the shared graph.
    pub async fn invoke(
        &self,
        session_id: &str,
        input: StateUpdate,
    ) -> Result<RunResult, EngineError> {
        let lease = self.lease(session_id).await;
        let guard = Arc::clone(&lease).lock_owned().await;
        let result = self.run(session_id, input).await;
        drop(guard);
        self.release_lease(session_id, lease).await;
        result
    }

    async fn run(&self, session_id: &str, input: StateUpdate) -> Result<RunResult, EngineError> {
        let (mut state, mut current) = match self.checkpointer.load(session_id).await? {
            Some(cp) => {
                let state = WorkflowState::from_values(Arc::clone(self.graph.schema()), cp.values);
                match cp.next_step {
                    Some(step) => {
                        log::info!("session {}: resuming at step '{}'", session_id, step);
                        (state, step)
                    }
                    // Finished run kept resumable: carry the state,
                    // start again from the entry point.
                    None => (state, self.graph.entry().to_string()),
                }
            }
            None => (self.graph.initial_state(), self.graph.entry().to_string()),
        };

        state.apply(input);

        loop {
            let step = match self.graph.step(&current) {
                Some(step) => Arc::clone(step),
                None => {
                    // Unreachable for graphs produced by compile();
                    // guards against checkpoints from a stale graph.
                    return Err(self
                        .fail(session_id, &state, &current, StepError::fatal("unknown step"))
                        .await);
                }
            };

            let update = match self.run_with_retry(step.as_ref(), &state, session_id).await {
                Ok(update) => update,
                Err(e) => return Err(self.fail(session_id, &state, &current, e).await),
            };

            // The merge only accepts fields the step declared; anything
            // else is a contract violation, not a retryable hiccup.
            if let Some(field) = update.fields().find(|f| !step.writes().contains(*f)) {
                let err = StepError::fatal(format!("wrote undeclared field '{}'", field));
                return Err(self.fail(session_id, &state, &current, err).await);
            }
            state.apply(update);

            // Routing sees the post-merge state, so the step's own
            // output decides the branch.
            let edge = match self.graph.edge(&current) {
                Some(edge) => edge,
                None => {
                    return Err(self
                        .fail(session_id, &state, &current, StepError::fatal("missing edge"))
                        .await);
                }
            };
            let dest = match edge.resolve(&state) {
                Ok(dest) => dest,
                Err(key) => {
                    let err = EngineError::Unroutable {
                        step: current.clone(),
                        key,
                        session: session_id.to_string(),
                    };
                    self.save_failed(session_id, &state, &current).await;
                    return Err(err);
                }
            };

            match dest {
                Dest::Step(next) => {
                    self.save(session_id, &state, Some(&next), RunStatus::Running)
                        .await?;
                    log::debug!("session {}: '{}' -> '{}'", session_id, current, next);
                    current = next;
                }
                Dest::Wait(next) => {
                    self.save(session_id, &state, Some(&next), RunStatus::Suspended)
                        .await?;
                    log::info!(
                        "session {}: suspended, will resume at '{}'",
                        session_id,
                        next
                    );
                    return Ok(RunResult {
                        state,
                        status: RunStatus::Suspended,
                    });
                }
                Dest::End => {
                    if self.keep_finished {
                        self.save(session_id, &state, None, RunStatus::Terminated)
                            .await?;
                    } else {
                        self.checkpointer.delete(session_id).await?;
                    }
                    log::info!("session {}: terminated", session_id);
                    return Ok(RunResult {
                        state,
                        status: RunStatus::Terminated,
                    });
                }
            }
        }
    }

    async fn run_with_retry(
        &self,
        step: &dyn Step,
        state: &WorkflowState,
        session_id: &str,
    ) -> Result<StateUpdate, StepError> {
        let max = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            log::info!("session {}: executing step '{}'", session_id, step.name());
            match step.run(state).await {
                Ok(update) => return Ok(update),
                Err(e) if e.is_transient() && attempt < max => {
                    log::warn!(
                        "session {}: step '{}' attempt {}/{} failed transiently: {}",
                        session_id,
                        step.name(),
                        attempt,
                        max,
                        e
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record a fatal step failure, preserving the last merged state
    /// and the failed step for later inspection or resumption
    async fn fail(
        &self,
        session_id: &str,
        state: &WorkflowState,
        step: &str,
        source: StepError,
    ) -> EngineError {
        self.save_failed(session_id, state, step).await;
        EngineError::Step {
            step: step.to_string(),
            session: session_id.to_string(),
            source,
        }
    }

    async fn save_failed(&self, session_id: &str, state: &WorkflowState, step: &str) {
        let cp = Checkpoint::new(
            state.values().clone(),
            Some(step.to_string()),
            RunStatus::Failed,
        );
        if let Err(e) = self.checkpointer.save(session_id, &cp).await {
            log::error!(
                "session {}: could not persist failure checkpoint: {}",
                session_id,
                e
            );
        }
    }

    async fn save(
        &self,
        session_id: &str,
        state: &WorkflowState,
        next: Option<&String>,
        status: RunStatus,
    ) -> Result<(), EngineError> {
        let cp = Checkpoint::new(state.values().clone(), next.cloned(), status);
        self.checkpointer.save(session_id, &cp).await?;
        Ok(())
    }

    async fn lease(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut leases = self.leases.lock().await;
        Arc::clone(
            leases
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drop the lease entry once no invoke holds or awaits it, so the
    /// map does not grow with the number of sessions ever seen
    async fn release_lease(&self, session_id: &str, lease: Arc<Mutex<()>>) {
        let mut leases = self.leases.lock().await;
        // Holding the map lock here means no new clone can be handed
        // out while we count references.
        drop(lease);
        let idle = leases
            .get(session_id)
            .map(|entry| Arc::strong_count(entry) == 1)
            .unwrap_or(false);
        if idle {
            leases.remove(session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::checkpoint::MemorySaver;
    use crate::engine::edge::RouteKey;
    use crate::engine::graph::GraphBuilder;
    use crate::engine::state::{Reducer, StateSchema};
    use crate::engine::step::FnStep;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn schema() -> StateSchema {
        StateSchema::new()
            .field_with_default("log", Reducer::Append, json!([]))
            .field("done", Reducer::Overwrite)
    }

    fn app(graph: Graph) -> App {
        App::new(graph, Arc::new(MemorySaver::new()))
    }

    #[tokio::test]
    async fn test_linear_run_terminates() {
        let graph = GraphBuilder::new(schema())
            .add_step(Arc::new(FnStep::new("a", &["log"], |_s| async {
                Ok(StateUpdate::new().set("log", json!(["a"])))
            })))
            .add_step(Arc::new(FnStep::new("b", &["log"], |_s| async {
                Ok(StateUpdate::new().set("log", json!(["b"])))
            })))
            .set_entry_point("a")
            .add_edge("a", Dest::step("b"))
            .add_edge("b", Dest::End)
            .compile()
            .unwrap();

        let result = app(graph).invoke("s", StateUpdate::new()).await.unwrap();
        assert_eq!(result.status, RunStatus::Terminated);
        assert_eq!(result.state.get("log"), Some(&json!(["a", "b"])));
    }

    #[tokio::test]
    async fn test_transient_failures_retried_within_bound() {
        let failures = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&failures);
        let graph = GraphBuilder::new(schema())
            .add_step(Arc::new(FnStep::new("flaky", &["done"], move |_s| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StepError::transient("network blip"))
                    } else {
                        Ok(StateUpdate::new().set("done", true))
                    }
                }
            })))
            .set_entry_point("flaky")
            .add_edge("flaky", Dest::End)
            .compile()
            .unwrap();

        let app = app(graph).with_retry_policy(RetryPolicy { max_attempts: 3 });
        let result = app.invoke("s", StateUpdate::new()).await.unwrap();
        assert_eq!(result.state.get_bool("done"), Some(true));
        assert_eq!(failures.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_escalate_past_bound() {
        let graph = GraphBuilder::new(schema())
            .add_step(Arc::new(FnStep::new("flaky", &[], |_s| async {
                Err(StepError::transient("still down"))
            })))
            .set_entry_point("flaky")
            .add_edge("flaky", Dest::End)
            .compile()
            .unwrap();

        let checkpointer = Arc::new(MemorySaver::new());
        let app = App::new(graph, Arc::clone(&checkpointer) as Arc<dyn Checkpointer>)
            .with_retry_policy(RetryPolicy { max_attempts: 2 });

        let err = app
            .invoke("s", StateUpdate::new().set("log", json!(["seed"])))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Step { ref step, .. } if step == "flaky"));

        // The checkpoint keeps the last merged state and the failed step.
        let cp = checkpointer.load("s").await.unwrap().unwrap();
        assert_eq!(cp.status, RunStatus::Failed);
        assert_eq!(cp.next_step.as_deref(), Some("flaky"));
        assert_eq!(cp.values["log"], json!(["seed"]));
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let graph = GraphBuilder::new(schema())
            .add_step(Arc::new(FnStep::new("bad", &[], move |_s| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(StepError::fatal("contract violation"))
                }
            })))
            .set_entry_point("bad")
            .add_edge("bad", Dest::End)
            .compile()
            .unwrap();

        let app = app(graph).with_retry_policy(RetryPolicy { max_attempts: 5 });
        let err = app.invoke("s", StateUpdate::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Step { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_outside_schema_is_rejected_at_merge() {
        let graph = GraphBuilder::new(schema())
            .add_step(Arc::new(FnStep::new("tidy", &["done"], |_s| async {
                Ok(StateUpdate::new()
                    .set("done", true)
                    .set("injected", "should never land"))
            })))
            .set_entry_point("tidy")
            .add_edge("tidy", Dest::End)
            .compile()
            .unwrap();

        let checkpointer = Arc::new(MemorySaver::new());
        let app = App::new(graph, Arc::clone(&checkpointer) as Arc<dyn Checkpointer>);

        let err = app.invoke("s", StateUpdate::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Step { ref step, .. } if step == "tidy"));
        assert!(err.to_string().contains("injected"));

        // Nothing from the offending update reached the state.
        let cp = checkpointer.load("s").await.unwrap().unwrap();
        assert!(!cp.values.contains_key("injected"));
        assert!(!cp.values.contains_key("done"));
    }

    #[tokio::test]
    async fn test_undeclared_schema_field_write_is_rejected() {
        // "log" is a schema field, but this step never declared it.
        let graph = GraphBuilder::new(schema())
            .add_step(Arc::new(FnStep::new("quiet", &["done"], |_s| async {
                Ok(StateUpdate::new().set("log", json!(["smuggled"])))
            })))
            .set_entry_point("quiet")
            .add_edge("quiet", Dest::End)
            .compile()
            .unwrap();

        let err = app(graph).invoke("s", StateUpdate::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Step { ref step, .. } if step == "quiet"));
        assert!(err.to_string().contains("log"));
    }

    #[tokio::test]
    async fn test_unroutable_key_fails_fatally() {
        let graph = GraphBuilder::new(schema())
            .add_step(Arc::new(FnStep::new("a", &[], |_s| async {
                Ok(StateUpdate::new())
            })))
            .set_entry_point("a")
            .add_conditional_edges(
                "a",
                |_s: &WorkflowState| RouteKey::from("unbound"),
                vec![("bound", Dest::End)],
            )
            .compile()
            .unwrap();

        let err = app(graph).invoke("s", StateUpdate::new()).await.unwrap_err();
        match err {
            EngineError::Unroutable { step, key, session } => {
                assert_eq!(step, "a");
                assert_eq!(key, RouteKey::from("unbound"));
                assert_eq!(session, "s");
            }
            other => panic!("expected Unroutable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_keep_finished_false_deletes_checkpoint() {
        let graph = GraphBuilder::new(schema())
            .add_step(Arc::new(FnStep::new("a", &[], |_s| async {
                Ok(StateUpdate::new())
            })))
            .set_entry_point("a")
            .add_edge("a", Dest::End)
            .compile()
            .unwrap();

        let checkpointer = Arc::new(MemorySaver::new());
        let app = App::new(graph, Arc::clone(&checkpointer) as Arc<dyn Checkpointer>)
            .with_keep_finished(false);

        app.invoke("s", StateUpdate::new()).await.unwrap();
        assert!(checkpointer.load("s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finished_session_restarts_with_carried_state() {
        let graph = GraphBuilder::new(schema())
            .add_step(Arc::new(FnStep::new("a", &["log"], |_s| async {
                Ok(StateUpdate::new().set("log", json!(["ran"])))
            })))
            .set_entry_point("a")
            .add_edge("a", Dest::End)
            .compile()
            .unwrap();

        let app = app(graph);
        app.invoke("s", StateUpdate::new()).await.unwrap();
        let second = app.invoke("s", StateUpdate::new()).await.unwrap();

        // Append state accumulates across invocations of one session.
        assert_eq!(second.state.get("log"), Some(&json!(["ran", "ran"])));
    }

    #[tokio::test]
    async fn test_lease_entries_do_not_accumulate() {
        let graph = GraphBuilder::new(schema())
            .add_step(Arc::new(FnStep::new("a", &[], |_s| async {
                Ok(StateUpdate::new())
            })))
            .set_entry_point("a")
            .add_edge("a", Dest::End)
            .compile()
            .unwrap();

        let app = app(graph);
        for i in 0..16 {
            app.invoke(&format!("s{}", i), StateUpdate::new())
                .await
                .unwrap();
        }

        // Idle sessions leave nothing behind in the lease map.
        assert!(app.leases.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_same_session_invokes_serialize() {
        let graph = GraphBuilder::new(schema())
            .add_step(Arc::new(FnStep::new("slow", &["log"], |_s| async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(StateUpdate::new().set("log", json!(["tick"])))
            })))
            .set_entry_point("slow")
            .add_edge("slow", Dest::End)
            .compile()
            .unwrap();

        let app = Arc::new(app(graph));
        let a = tokio::spawn({
            let app = Arc::clone(&app);
            async move { app.invoke("same", StateUpdate::new()).await }
        });
        let b = tokio::spawn({
            let app = Arc::clone(&app);
            async move { app.invoke("same", StateUpdate::new()).await }
        });

        let (ra, rb) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        // Both complete; the later one observes both merges.
        let longest = ra
            .state
            .get_array("log")
            .unwrap()
            .len()
            .max(rb.state.get_array("log").unwrap().len());
        assert_eq!(longest, 2);
    }
}
