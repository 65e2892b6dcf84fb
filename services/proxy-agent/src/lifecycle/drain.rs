//! Drain state machine.
//!
//! A drain request latches `Accepting → Draining` once and arms three timers:
//! - drain delay: stop accepting, create the drain file, emit
//!   `NotAcceptingPlayers`, move to `EmptyWait`
//! - poll: every interval, stop once no player is connected (`EmptyWait` only)
//! - force stop: stop regardless of connected players
//!
//! In ttl mode the drain annotation is ignored and a single deadline stops
//! the proxy straight from `Accepting`.

use std::io;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use shulker_crds::{Proxy, WatchAction, WatchEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{ConnectionGate, DrainTimings, LifecycleMode, LifecyclePhase, LifecycleState};
use crate::gateway::{ClusterGateway, StatusEvent};
use crate::host::ProxyHost;
use crate::marker::DrainMarker;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Fatal errors of the drain sequence.
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("failed to create drain file: {0}")]
    DrainFile(#[source] io::Error),
}

/// Result of one player-count poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not waiting for players in this phase.
    Skipped(LifecyclePhase),
    /// Players are still connected.
    Waiting { players: usize },
    /// The proxy was empty and has been stopped.
    Stopped,
}

/// Owner of the lifecycle state and its timers.
pub struct DrainLifecycle {
    state: Arc<LifecycleState>,
    mode: LifecycleMode,
    host: Arc<dyn ProxyHost>,
    marker: Arc<dyn DrainMarker>,
    gateway: Arc<dyn ClusterGateway>,
    fatal_tx: mpsc::UnboundedSender<DrainError>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl DrainLifecycle {
    /// Create the state machine in `Accepting`.
    ///
    /// The receiver yields fatal drain errors for the top-level handler.
    pub fn new(
        mode: LifecycleMode,
        host: Arc<dyn ProxyHost>,
        marker: Arc<dyn DrainMarker>,
        gateway: Arc<dyn ClusterGateway>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DrainError>) {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let lifecycle = Arc::new(Self {
            state: Arc::new(LifecycleState::new()),
            mode,
            host,
            marker,
            gateway,
            fatal_tx,
            timers: Mutex::new(Vec::new()),
        });
        (lifecycle, fatal_rx)
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.state.phase()
    }

    pub fn mode(&self) -> LifecycleMode {
        self.mode
    }

    pub fn gate(&self) -> ConnectionGate {
        ConnectionGate::new(Arc::clone(&self.state))
    }

    /// Number of timers armed so far.
    pub fn armed_timers(&self) -> usize {
        self.timers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Arm the time-to-live deadline in ttl mode. No-op in drain mode.
    pub fn start(self: &Arc<Self>) {
        let LifecycleMode::Ttl(ttl) = self.mode else {
            return;
        };

        info!(ttl_secs = ttl.as_secs(), "Proxy will be force stopped after its time-to-live");
        self.arm(ttl, |this| {
            this.finish(&[LifecyclePhase::Accepting], "time-to-live elapsed");
        });
    }

    /// Handle a notification about the watched `Proxy`.
    ///
    /// Only `Modified` snapshots carrying the drain annotation act. Returns
    /// true if this call started the drain.
    pub fn on_proxy_event(self: &Arc<Self>, event: &WatchEvent<Proxy>) -> bool {
        debug!(action = %event.action, "Detected modification on Proxy");

        if event.action != WatchAction::Modified || !event.object.drain_requested() {
            return false;
        }
        self.request_drain()
    }

    /// Latch `Accepting → Draining` and arm the escalation timers.
    ///
    /// Repeated requests are no-ops.
    pub fn request_drain(self: &Arc<Self>) -> bool {
        let LifecycleMode::Drain(timings) = self.mode else {
            debug!("Drain request ignored in ttl mode");
            return false;
        };

        if let Err(phase) = self
            .state
            .transition(&[LifecyclePhase::Accepting], LifecyclePhase::Draining)
        {
            debug!(phase = %phase, "Drain already requested");
            return false;
        }

        info!(
            delay_secs = timings.delay.as_secs(),
            poll_interval_secs = timings.poll_interval.as_secs(),
            force_stop_secs = timings.force_stop_after.as_secs(),
            "Drain requested"
        );
        self.arm_drain_timers(timings);
        true
    }

    fn arm_drain_timers(self: &Arc<Self>, timings: DrainTimings) {
        let this = Arc::downgrade(self);
        let drain_delay = tokio::spawn(async move {
            tokio::time::sleep(timings.delay).await;
            let Some(this) = this.upgrade() else { return };

            if let Err(e) = this.stop_accepting().await {
                error!(error = %e, "Drain failed");
                let _ = this.fatal_tx.send(e);
            }
        });

        let this = Arc::downgrade(self);
        let poll = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(timings.poll_interval.max(MIN_POLL_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(this) = this.upgrade() else { return };

                match this.poll_players() {
                    PollOutcome::Stopped | PollOutcome::Skipped(LifecyclePhase::Stopped) => return,
                    _ => {}
                }
            }
        });

        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        timers.push(drain_delay);
        timers.push(poll);
        drop(timers);

        self.arm(timings.force_stop_after, |this| {
            this.force_stop();
        });
    }

    fn arm<F>(self: &Arc<Self>, after: Duration, action: F)
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let this = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(this) = Weak::upgrade(&this) {
                action(&this);
            }
        });
        self.timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// Stop accepting players and signal it locally and to the cluster.
    ///
    /// The accept flag flips before the drain file is written. A drain file
    /// failure is fatal and leaves the proxy in `Draining`.
    pub async fn stop_accepting(&self) -> Result<(), DrainError> {
        if self.state.phase() != LifecyclePhase::Draining {
            debug!(phase = %self.state.phase(), "Skipping drain delay");
            return Ok(());
        }

        self.state.stop_accepting();
        self.marker
            .create_drain_file()
            .map_err(DrainError::DrainFile)?;

        if let Err(e) = self.gateway.emit(StatusEvent::NotAcceptingPlayers).await {
            warn!(error = %e, "Failed to emit NotAcceptingPlayers event");
        }

        if self
            .state
            .transition(&[LifecyclePhase::Draining], LifecyclePhase::EmptyWait)
            .is_ok()
        {
            info!("Proxy is no longer accepting players");
        }
        Ok(())
    }

    /// One player-count check. Acts only in `EmptyWait`.
    pub fn poll_players(&self) -> PollOutcome {
        let phase = self.state.phase();
        if phase != LifecyclePhase::EmptyWait {
            return PollOutcome::Skipped(phase);
        }

        let players = self.host.live_connection_count();
        if players > 0 {
            info!(players, "There are still players connected, waiting");
            return PollOutcome::Waiting { players };
        }

        if self.finish(&[LifecyclePhase::EmptyWait], "proxy is empty") {
            PollOutcome::Stopped
        } else {
            PollOutcome::Skipped(self.state.phase())
        }
    }

    /// Stop regardless of connected players. Returns false if not draining.
    pub fn force_stop(&self) -> bool {
        let players = self.host.live_connection_count();
        let stopped = self.finish(
            &[LifecyclePhase::Draining, LifecyclePhase::EmptyWait],
            "force stop deadline reached",
        );
        if stopped && players > 0 {
            warn!(players, "Force stopped with players still connected");
        }
        stopped
    }

    /// Enter `Stopped` from one of `from` and tear the host down.
    fn finish(&self, from: &[LifecyclePhase], reason: &'static str) -> bool {
        match self.state.transition(from, LifecyclePhase::Stopped) {
            Ok(previous) => {
                info!(previous = %previous, reason, "Stopping proxy");
                self.state.stop_accepting();
                self.host.shutdown();
                true
            }
            Err(phase) => {
                debug!(phase = %phase, reason, "Stop skipped");
                false
            }
        }
    }

    /// Cancel every armed timer.
    pub fn cancel_timers(&self) {
        for timer in self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            timer.abort();
        }
    }
}

impl Drop for DrainLifecycle {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}
