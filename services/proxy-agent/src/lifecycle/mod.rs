//! Proxy lifecycle.
//!
//! ```text
//! Accepting --drain annotation--> Draining --drain delay--> EmptyWait --no players--> Stopped
//!                                     |                         |
//!                                     +------force stop---------+-------------------> Stopped
//! Accepting --time-to-live (ttl mode)--------------------------------------------> Stopped
//! ```
//!
//! Phases only move forward. The phase and the accept flag live in a single
//! `LifecycleState` cell shared by the watch worker, timer tasks and
//! connection handlers.

mod drain;
mod gate;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

pub use drain::{DrainError, DrainLifecycle, PollOutcome};
pub use gate::{ConnectionGate, GateDecision};

/// Default interval between player-count polls while waiting to empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Lifecycle phase of the proxy. Ordered: transitions only go up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LifecyclePhase {
    Accepting = 0,
    Draining = 1,
    EmptyWait = 2,
    Stopped = 3,
}

impl LifecyclePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Accepting,
            1 => Self::Draining,
            2 => Self::EmptyWait,
            _ => Self::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepting => "accepting",
            Self::Draining => "draining",
            Self::EmptyWait => "empty_wait",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timer settings for the drain sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainTimings {
    /// Delay between the drain request and rejecting new players.
    pub delay: Duration,
    /// Interval between player-count polls.
    pub poll_interval: Duration,
    /// Hard deadline after the drain request.
    pub force_stop_after: Duration,
}

impl DrainTimings {
    /// Defaults: stop accepting immediately, poll every 30s.
    pub fn with_force_stop(force_stop_after: Duration) -> Self {
        Self {
            delay: Duration::ZERO,
            poll_interval: DEFAULT_POLL_INTERVAL,
            force_stop_after,
        }
    }
}

/// How the proxy leaves `Accepting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleMode {
    /// Wait for the drain annotation, then escalate with timers.
    Drain(DrainTimings),
    /// Stop unconditionally once the time-to-live elapses.
    Ttl(Duration),
}

/// Atomic phase + accept flag.
#[derive(Debug)]
pub struct LifecycleState {
    phase: AtomicU8,
    accepting: AtomicBool,
}

impl LifecycleState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(LifecyclePhase::Accepting as u8),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        LifecyclePhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Whether a drain has been latched (any phase past `Accepting`).
    pub fn is_drained(&self) -> bool {
        self.phase() > LifecyclePhase::Accepting
    }

    /// Move to `to` if the current phase is one of `from`.
    ///
    /// Returns the previous phase on success. Fails without side effects when
    /// another caller got there first or `to` would not move forward.
    pub(crate) fn transition(
        &self,
        from: &[LifecyclePhase],
        to: LifecyclePhase,
    ) -> Result<LifecyclePhase, LifecyclePhase> {
        self.phase
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                let current = LifecyclePhase::from_u8(raw);
                (from.contains(&current) && to > current).then_some(to as u8)
            })
            .map(LifecyclePhase::from_u8)
            .map_err(LifecyclePhase::from_u8)
    }

    pub(crate) fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}
