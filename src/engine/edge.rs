// SPDX-License-Identifier: MIT

//! Edge table and conditional routing
//!
//! Every step routes through an [`Edge`]: either a static destination
//! or a router function over the post-merge state whose result is
//! looked up in a closed table of [`RouteKey`] bindings. Routing is
//! evaluated only after the step's output has been merged, so a step's
//! own output decides the branch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::state::WorkflowState;

/// Outcome of a conditional router
///
/// Keys form a closed enumeration declared when the edge is built; a
/// key the table does not bind is a fatal routing error, never a
/// silent default.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey(String);

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouteKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for RouteKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<bool> for RouteKey {
    fn from(key: bool) -> Self {
        Self(key.to_string())
    }
}

/// Destination of an edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dest {
    /// Continue with the named step
    Step(String),
    /// Terminal sentinel: the run is complete
    End,
    /// Suspend the run: the current invoke returns, the checkpoint
    /// points at the named step, and the next invoke for the session
    /// resumes there after merging fresh caller input
    Wait(String),
}

impl Dest {
    pub fn step(name: &str) -> Self {
        Self::Step(name.to_string())
    }

    pub fn wait(name: &str) -> Self {
        Self::Wait(name.to_string())
    }

    /// The step this destination references, if any
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Dest::Step(name) | Dest::Wait(name) => Some(name),
            Dest::End => None,
        }
    }
}

pub type Router = Arc<dyn Fn(&WorkflowState) -> RouteKey + Send + Sync>;

/// Outgoing routing for a single step
pub enum Edge {
    Static(Dest),
    Conditional {
        router: Router,
        routes: HashMap<RouteKey, Dest>,
    },
}

impl Edge {
    /// Resolve the next destination against the post-merge state
    ///
    /// Returns the unmatched key on a routing miss so the executor can
    /// build a fatal error with full context.
    pub fn resolve(&self, state: &WorkflowState) -> Result<Dest, RouteKey> {
        match self {
            Edge::Static(dest) => Ok(dest.clone()),
            Edge::Conditional { router, routes } => {
                let key = router(state);
                routes.get(&key).cloned().ok_or(key)
            }
        }
    }

    /// All destinations this edge can reach, for compile-time checks
    pub fn destinations(&self) -> Vec<&Dest> {
        match self {
            Edge::Static(dest) => vec![dest],
            Edge::Conditional { routes, .. } => routes.values().collect(),
        }
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Static(dest) => f.debug_tuple("Static").field(dest).finish(),
            Edge::Conditional { routes, .. } => f
                .debug_struct("Conditional")
                .field("routes", routes)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::{Reducer, StateSchema, StateUpdate};

    fn state_with_flag(value: bool) -> WorkflowState {
        let schema = Arc::new(StateSchema::new().field("approved", Reducer::Overwrite));
        let mut state = WorkflowState::new(schema);
        state.apply(StateUpdate::new().set("approved", value));
        state
    }

    #[test]
    fn test_static_edge_resolves_unconditionally() {
        let edge = Edge::Static(Dest::step("next"));
        assert_eq!(edge.resolve(&state_with_flag(true)), Ok(Dest::step("next")));
        assert_eq!(edge.resolve(&state_with_flag(false)), Ok(Dest::step("next")));
    }

    #[test]
    fn test_conditional_edge_routes_on_state() {
        let router: Router =
            Arc::new(|s: &WorkflowState| s.get_bool("approved").unwrap_or(false).into());
        let routes = HashMap::from([
            (RouteKey::from(true), Dest::End),
            (RouteKey::from(false), Dest::step("selection")),
        ]);
        let edge = Edge::Conditional { router, routes };

        assert_eq!(edge.resolve(&state_with_flag(true)), Ok(Dest::End));
        assert_eq!(
            edge.resolve(&state_with_flag(false)),
            Ok(Dest::step("selection"))
        );
    }

    #[test]
    fn test_unbound_key_is_returned() {
        let router: Router = Arc::new(|_s: &WorkflowState| "surprise".into());
        let edge = Edge::Conditional {
            router,
            routes: HashMap::from([(RouteKey::from("expected"), Dest::End)]),
        };

        let err = edge.resolve(&state_with_flag(true)).unwrap_err();
        assert_eq!(err, RouteKey::from("surprise"));
    }
}
