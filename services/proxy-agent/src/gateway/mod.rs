//! Cluster gateway: watch streams, listings and status events.
//!
//! The gateway hides the orchestrator transport. Watches are delivered as
//! `WatchSubscription`s, a bounded channel of `(action, snapshot)` pairs fed by
//! a producer task. Delivery is at-least-once; order only holds per resource.
//! Dropping a subscription unsubscribes.

mod kubernetes;
mod mock;

use async_trait::async_trait;
use shulker_crds::{MinecraftServer, Proxy, WatchEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

pub use self::kubernetes::KubeGateway;
pub use self::mock::MockGateway;

/// Buffered notifications per subscription before the producer waits.
pub const WATCH_BUFFER: usize = 256;

/// Component name reported on emitted events.
pub const REPORTING_COMPONENT: &str = "shulker-proxy-agent";

/// Gateway errors. All of them are transport failures from the agent's view.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("invalid object encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("watch for {0} is already subscribed")]
    AlreadySubscribed(&'static str),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Cluster-visible status events emitted by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    AgentReady,
    NotAcceptingPlayers,
}

impl StatusEvent {
    pub fn event_type(&self) -> &'static str {
        "Normal"
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::AgentReady => "AgentReady",
            Self::NotAcceptingPlayers => "NotAcceptingPlayers",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::AgentReady => "Agent is initialized and ready",
            Self::NotAcceptingPlayers => "Proxy is no longer accepting players",
        }
    }
}

/// Orchestrator operations the agent depends on.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Watch the `Proxy` resource this agent runs for.
    async fn watch_proxy(&self) -> Result<WatchSubscription<Proxy>, GatewayError>;

    /// Watch every `MinecraftServer` in the proxy's namespace.
    async fn watch_minecraft_servers(
        &self,
    ) -> Result<WatchSubscription<MinecraftServer>, GatewayError>;

    /// Current `MinecraftServer` listing, used to bootstrap the directory.
    async fn list_minecraft_servers(&self) -> Result<Vec<MinecraftServer>, GatewayError>;

    /// Publish a status event. Callers treat failures as best effort.
    async fn emit(&self, event: StatusEvent) -> Result<(), GatewayError>;
}

/// Receiving end of a watch.
pub struct WatchSubscription<T> {
    rx: mpsc::Receiver<WatchEvent<T>>,
    producer: Option<AbortHandle>,
}

impl<T> WatchSubscription<T> {
    pub fn new(rx: mpsc::Receiver<WatchEvent<T>>, producer: Option<AbortHandle>) -> Self {
        Self { rx, producer }
    }

    /// Next notification, or `None` once the producer is gone.
    pub async fn recv(&mut self) -> Option<WatchEvent<T>> {
        self.rx.recv().await
    }
}

impl<T> Drop for WatchSubscription<T> {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}
