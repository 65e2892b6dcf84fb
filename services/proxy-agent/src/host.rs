//! Host proxy capabilities.
//!
//! The reconcilers and the drain lifecycle never touch sockets. They drive the
//! host proxy through the `ProxyHost` trait:
//! - Registered backends (name → address), the live routing table
//! - Live connection count, polled while draining
//! - Process shutdown, requested exactly once when the lifecycle stops
//!
//! `ServerRegistry` is the in-process implementation used by the bundled
//! front listener and by tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tracing::{debug, info};

/// A backend registered with the host proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendServer {
    /// Unique name (the `MinecraftServer` resource name).
    pub name: String,
    /// Host or IP the backend listens on.
    pub host: String,
    pub port: u16,
}

impl BackendServer {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BackendServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Connection-layer operations the agent needs from the host proxy.
///
/// All methods are synchronous and must not block.
pub trait ProxyHost: Send + Sync {
    /// Register a backend. Returns false if the name was already registered.
    fn register_backend(&self, server: BackendServer) -> bool;

    /// Remove a backend by name, returning it if it was registered.
    fn unregister_backend(&self, name: &str) -> Option<BackendServer>;

    fn get_backend(&self, name: &str) -> Option<BackendServer>;

    /// Snapshot of currently connected players.
    fn live_connection_count(&self) -> usize;

    /// Tear the host process down.
    fn shutdown(&self);
}

/// In-process routing table and connection tracker.
///
/// Backends live in an `ArcSwap` snapshot so that connection handlers read
/// without locking while watch workers write.
pub struct ServerRegistry {
    servers: ArcSwap<HashMap<String, BackendServer>>,
    connections: AtomicUsize,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            servers: ArcSwap::from_pointee(HashMap::new()),
            connections: AtomicUsize::new(0),
            shutdown_tx,
        }
    }

    /// Receiver that flips to `true` once shutdown has been requested.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Count a connection as live until the returned guard is dropped.
    pub fn track_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.connections.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            registry: Arc::clone(self),
        }
    }

    /// Names of all registered backends.
    pub fn backend_names(&self) -> Vec<String> {
        self.servers.load().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.servers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.load().is_empty()
    }
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyHost for ServerRegistry {
    fn register_backend(&self, server: BackendServer) -> bool {
        let mut inserted = false;
        self.servers.rcu(|current| {
            if current.contains_key(&server.name) {
                inserted = false;
                return Arc::clone(current);
            }
            let mut next = HashMap::clone(current);
            next.insert(server.name.clone(), server.clone());
            inserted = true;
            Arc::new(next)
        });

        if inserted {
            debug!(server = %server.name, address = %server, "Backend registered");
        }
        inserted
    }

    fn unregister_backend(&self, name: &str) -> Option<BackendServer> {
        let mut removed = None;
        self.servers.rcu(|current| {
            if !current.contains_key(name) {
                removed = None;
                return Arc::clone(current);
            }
            let mut next = HashMap::clone(current);
            removed = next.remove(name);
            Arc::new(next)
        });

        if removed.is_some() {
            debug!(server = %name, "Backend unregistered");
        }
        removed
    }

    fn get_backend(&self, name: &str) -> Option<BackendServer> {
        self.servers.load().get(name).cloned()
    }

    fn live_connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        info!("Shutting down proxy");
        self.shutdown_tx.send_replace(true);
    }
}

/// Keeps a connection counted in `live_connection_count` while alive.
pub struct ConnectionGuard {
    registry: Arc<ServerRegistry>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.connections.fetch_sub(1, Ordering::SeqCst);
    }
}
