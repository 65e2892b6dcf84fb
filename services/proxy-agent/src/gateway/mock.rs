//! In-memory gateway for tests and local development.
//!
//! Tests push notifications through `send_proxy` / `send_server`, seed the
//! bootstrap listing with `set_servers`, and inspect emitted status events.

use std::sync::Mutex;

use async_trait::async_trait;
use shulker_crds::{MinecraftServer, Proxy, WatchEvent};
use tokio::sync::mpsc;
use tracing::debug;

use super::{ClusterGateway, GatewayError, StatusEvent, WatchSubscription, WATCH_BUFFER};

/// Gateway driven by the test harness.
pub struct MockGateway {
    proxy_tx: mpsc::Sender<WatchEvent<Proxy>>,
    proxy_rx: Mutex<Option<mpsc::Receiver<WatchEvent<Proxy>>>>,
    server_tx: mpsc::Sender<WatchEvent<MinecraftServer>>,
    server_rx: Mutex<Option<mpsc::Receiver<WatchEvent<MinecraftServer>>>>,
    servers: Mutex<Vec<MinecraftServer>>,
    emitted: Mutex<Vec<StatusEvent>>,
    fail_watches: bool,
    fail_emits: bool,
}

impl MockGateway {
    pub fn new() -> Self {
        let (proxy_tx, proxy_rx) = mpsc::channel(WATCH_BUFFER);
        let (server_tx, server_rx) = mpsc::channel(WATCH_BUFFER);
        Self {
            proxy_tx,
            proxy_rx: Mutex::new(Some(proxy_rx)),
            server_tx,
            server_rx: Mutex::new(Some(server_rx)),
            servers: Mutex::new(Vec::new()),
            emitted: Mutex::new(Vec::new()),
            fail_watches: false,
            fail_emits: false,
        }
    }

    /// A gateway whose watches fail to establish.
    pub fn failing_watches() -> Self {
        Self {
            fail_watches: true,
            ..Self::new()
        }
    }

    /// A gateway whose status emission always fails.
    pub fn failing_emits() -> Self {
        Self {
            fail_emits: true,
            ..Self::new()
        }
    }

    /// Seed the listing returned by `list_minecraft_servers`.
    pub fn set_servers(&self, servers: Vec<MinecraftServer>) {
        *self.servers.lock().unwrap_or_else(|e| e.into_inner()) = servers;
    }

    pub async fn send_proxy(&self, event: WatchEvent<Proxy>) {
        let _ = self.proxy_tx.send(event).await;
    }

    pub async fn send_server(&self, event: WatchEvent<MinecraftServer>) {
        let _ = self.server_tx.send(event).await;
    }

    /// Status events emitted so far, in order.
    pub fn emitted(&self) -> Vec<StatusEvent> {
        self.emitted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn take_receiver<T>(
    slot: &Mutex<Option<mpsc::Receiver<WatchEvent<T>>>>,
    kind: &'static str,
) -> Result<WatchSubscription<T>, GatewayError> {
    slot.lock()
        .unwrap_or_else(|e| e.into_inner())
        .take()
        .map(|rx| WatchSubscription::new(rx, None))
        .ok_or(GatewayError::AlreadySubscribed(kind))
}

#[async_trait]
impl ClusterGateway for MockGateway {
    async fn watch_proxy(&self) -> Result<WatchSubscription<Proxy>, GatewayError> {
        if self.fail_watches {
            return Err(GatewayError::Transport("[MOCK] watch refused".to_string()));
        }
        take_receiver(&self.proxy_rx, "Proxy")
    }

    async fn watch_minecraft_servers(
        &self,
    ) -> Result<WatchSubscription<MinecraftServer>, GatewayError> {
        if self.fail_watches {
            return Err(GatewayError::Transport("[MOCK] watch refused".to_string()));
        }
        take_receiver(&self.server_rx, "MinecraftServer")
    }

    async fn list_minecraft_servers(&self) -> Result<Vec<MinecraftServer>, GatewayError> {
        Ok(self.servers.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn emit(&self, event: StatusEvent) -> Result<(), GatewayError> {
        if self.fail_emits {
            return Err(GatewayError::Transport("[MOCK] emit refused".to_string()));
        }
        debug!(reason = event.reason(), "[MOCK] Status event emitted");
        self.emitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }
}
