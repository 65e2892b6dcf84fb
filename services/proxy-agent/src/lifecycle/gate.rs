//! Connection gate consulted on every login attempt.

use std::sync::Arc;

use super::LifecycleState;
use crate::message::{DisconnectMessage, NOT_ACCEPTING_PLAYERS};

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Accept,
    Reject(DisconnectMessage),
}

/// Read-only view of the lifecycle used by connection handlers.
///
/// A check is a single atomic load; it never blocks.
#[derive(Debug, Clone)]
pub struct ConnectionGate {
    state: Arc<LifecycleState>,
}

impl ConnectionGate {
    pub fn new(state: Arc<LifecycleState>) -> Self {
        Self { state }
    }

    pub fn should_accept(&self) -> bool {
        self.state.is_accepting()
    }

    /// Decide on a login. Must run before any backend is selected.
    pub fn check(&self) -> GateDecision {
        if self.should_accept() {
            GateDecision::Accept
        } else {
            GateDecision::Reject(NOT_ACCEPTING_PLAYERS)
        }
    }
}
