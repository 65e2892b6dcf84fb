//! Agent runtime: wires the gateway to the reconcilers.
//!
//! Startup order:
//! 1. subscribe to the `Proxy` (drain mode) and `MinecraftServer` watches
//! 2. bootstrap the directory from a full listing
//! 3. spawn one worker per subscription
//! 4. arm the time-to-live (ttl mode) and emit `AgentReady`
//!
//! Any failure before step 3 drops the subscriptions taken so far.

use std::sync::Arc;

use shulker_crds::{MinecraftServer, Proxy};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::directory::{DirectoryChange, DirectoryReconciler};
use crate::gateway::{ClusterGateway, GatewayError, StatusEvent, WatchSubscription};
use crate::host::ProxyHost;
use crate::lifecycle::{ConnectionGate, DrainError, DrainLifecycle, LifecycleMode};
use crate::limbo::LimboSelector;
use crate::marker::DrainMarker;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to watch {kind}: {source}")]
    Watch {
        kind: &'static str,
        #[source]
        source: GatewayError,
    },

    #[error("failed to list MinecraftServers: {0}")]
    Bootstrap(#[source] GatewayError),
}

/// Running agent. Dropping it unsubscribes and cancels timers.
pub struct Agent {
    lifecycle: Arc<DrainLifecycle>,
    directory: Arc<DirectoryReconciler>,
    limbo: Arc<LimboSelector>,
    fatal_rx: mpsc::UnboundedReceiver<DrainError>,
    workers: Vec<JoinHandle<()>>,
}

impl Agent {
    pub async fn start(
        config: &Config,
        gateway: Arc<dyn ClusterGateway>,
        host: Arc<dyn ProxyHost>,
        marker: Arc<dyn DrainMarker>,
    ) -> Result<Self, AgentError> {
        let (lifecycle, fatal_rx) = DrainLifecycle::new(
            config.lifecycle,
            Arc::clone(&host),
            marker,
            Arc::clone(&gateway),
        );
        let directory = Arc::new(DirectoryReconciler::new(
            Arc::clone(&host),
            config.readiness_policy,
        ));

        let proxy_watch = match config.lifecycle {
            LifecycleMode::Drain(_) => Some(gateway.watch_proxy().await.map_err(|source| {
                AgentError::Watch {
                    kind: "Proxy",
                    source,
                }
            })?),
            LifecycleMode::Ttl(_) => None,
        };

        let server_watch =
            gateway
                .watch_minecraft_servers()
                .await
                .map_err(|source| AgentError::Watch {
                    kind: "MinecraftServer",
                    source,
                })?;

        let servers = gateway
            .list_minecraft_servers()
            .await
            .map_err(AgentError::Bootstrap)?;
        directory.bootstrap(servers);

        let mut workers = Vec::with_capacity(2);
        if let Some(subscription) = proxy_watch {
            workers.push(tokio::spawn(run_proxy_worker(
                Arc::clone(&lifecycle),
                subscription,
            )));
        }
        workers.push(tokio::spawn(run_server_worker(
            Arc::clone(&directory),
            server_watch,
        )));

        lifecycle.start();

        if let Err(e) = gateway.emit(StatusEvent::AgentReady).await {
            warn!(error = %e, "Failed to emit AgentReady event");
        }
        info!(proxy = %config.proxy, "Agent started");

        Ok(Self {
            limbo: Arc::new(LimboSelector::new(Arc::clone(&directory), host)),
            lifecycle,
            directory,
            fatal_rx,
            workers,
        })
    }

    pub fn gate(&self) -> ConnectionGate {
        self.lifecycle.gate()
    }

    pub fn lifecycle(&self) -> &Arc<DrainLifecycle> {
        &self.lifecycle
    }

    pub fn directory(&self) -> &Arc<DirectoryReconciler> {
        &self.directory
    }

    pub fn limbo(&self) -> Arc<LimboSelector> {
        Arc::clone(&self.limbo)
    }

    /// Wait for the next fatal drain error.
    pub async fn fatal_error(&mut self) -> Option<DrainError> {
        self.fatal_rx.recv().await
    }

    /// Stop the watch workers and cancel lifecycle timers.
    pub fn shutdown(&mut self) {
        for worker in self.workers.drain(..) {
            worker.abort();
        }
        self.lifecycle.cancel_timers();
        debug!("Agent workers stopped");
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_proxy_worker(lifecycle: Arc<DrainLifecycle>, mut watch: WatchSubscription<Proxy>) {
    while let Some(event) = watch.recv().await {
        lifecycle.on_proxy_event(&event);
    }
    warn!("Proxy watch ended");
}

async fn run_server_worker(
    directory: Arc<DirectoryReconciler>,
    mut watch: WatchSubscription<MinecraftServer>,
) {
    while let Some(event) = watch.recv().await {
        if let DirectoryChange::Ignored(_) = directory.on_watch_event(&event) {
            continue;
        }
        debug!(tags = ?directory.index().tags(), "Directory updated");
    }
    warn!("MinecraftServer watch ended");
}
