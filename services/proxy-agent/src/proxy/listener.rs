//! Front TCP listener.
//!
//! Per connection:
//! 1. read the handshake frame
//! 2. login attempts consult the connection gate; rejected players get a
//!    login-disconnect frame and the socket is closed
//! 3. pick a backend through the limbo selector
//! 4. replay the handshake to the backend and proxy bytes both ways
//!
//! Logged-in connections are counted in the `ServerRegistry` for as long as
//! they are proxied.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};

use super::frame::{login_disconnect, read_frame, Handshake, MAX_HANDSHAKE_LEN};
use crate::host::{BackendServer, ProxyHost, ServerRegistry};
use crate::lifecycle::{ConnectionGate, GateDecision};
use crate::limbo::{LimboSelector, ServerSelection, LIMBO_TAG};
use crate::message::DisconnectMessage;

pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_addr: SocketAddr,
    pub max_connections: usize,
    /// Server name players are routed to on join.
    pub initial_server: String,
    pub handshake_timeout: Duration,
    pub connect_timeout: Duration,
}

impl ListenerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            initial_server: LIMBO_TAG.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[derive(Debug, Default)]
pub struct ListenerStats {
    pub connections_accepted: AtomicU64,
    pub connections_active: AtomicU64,
    /// Dropped because `max_connections` was reached.
    pub connections_rejected: AtomicU64,
    /// Logins turned away by the gate.
    pub logins_rejected: AtomicU64,
    pub backend_connected: AtomicU64,
    pub backend_failed: AtomicU64,
    pub bytes_to_backend: AtomicU64,
    pub bytes_from_backend: AtomicU64,
}

pub struct Listener {
    config: ListenerConfig,
    listener: TcpListener,
    registry: Arc<ServerRegistry>,
    gate: ConnectionGate,
    limbo: Arc<LimboSelector>,
    conn_semaphore: Arc<Semaphore>,
    stats: Arc<ListenerStats>,
}

impl Listener {
    pub async fn bind(
        config: ListenerConfig,
        registry: Arc<ServerRegistry>,
        gate: ConnectionGate,
        limbo: Arc<LimboSelector>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            conn_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            listener,
            config,
            registry,
            gate,
            limbo,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Accept connections until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown.wait_for(|stopped| *stopped) => {
                    info!("Listener shutting down");
                    return Ok(());
                }
            };

            let (stream, peer_addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let permit = match self.conn_semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    self.stats
                        .connections_rejected
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(peer_addr = %peer_addr, "Connection rejected: max connections reached");
                    continue;
                }
            };

            self.stats
                .connections_accepted
                .fetch_add(1, Ordering::Relaxed);
            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

            let listener = Arc::clone(&self);
            tokio::spawn(
                async move {
                    if let Err(e) = listener.handle_connection(stream).await {
                        debug!(error = %e, "Connection error");
                    }
                    listener
                        .stats
                        .connections_active
                        .fetch_sub(1, Ordering::Relaxed);
                    drop(permit);
                }
                .instrument(tracing::info_span!("connection", peer = %peer_addr)),
            );
        }
    }

    async fn handle_connection(&self, mut client: TcpStream) -> io::Result<()> {
        let read_handshake = read_frame(&mut client, MAX_HANDSHAKE_LEN);
        let handshake_frame =
            match tokio::time::timeout(self.config.handshake_timeout, read_handshake).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) => {
                    debug!(error = %e, "Invalid handshake");
                    return Ok(());
                }
                Err(_) => {
                    debug!("Handshake timeout");
                    return Ok(());
                }
            };

        let handshake = match Handshake::parse(handshake_frame.payload()) {
            Ok(handshake) => handshake,
            Err(e) => {
                debug!(error = %e, "Invalid handshake");
                return Ok(());
            }
        };
        let login = handshake.is_login();

        if login {
            if let GateDecision::Reject(message) = self.gate.check() {
                self.stats.logins_rejected.fetch_add(1, Ordering::Relaxed);
                info!("Login rejected: proxy is not accepting players");
                return disconnect(&mut client, &message).await;
            }
        }

        // Counted only while a player session is live.
        let _session = login.then(|| self.registry.track_connection());

        let backend = match self.limbo.select(&self.config.initial_server) {
            ServerSelection::Selected(backend) => backend,
            ServerSelection::Passthrough => {
                match self.registry.get_backend(&self.config.initial_server) {
                    Some(backend) => backend,
                    None => {
                        warn!(server = %self.config.initial_server, "Initial server is not registered");
                        return Ok(());
                    }
                }
            }
            ServerSelection::Disconnect(message) => {
                if login {
                    return disconnect(&mut client, &message).await;
                }
                return Ok(());
            }
        };

        let mut upstream = match self.connect(&backend).await {
            Ok(stream) => {
                self.stats.backend_connected.fetch_add(1, Ordering::Relaxed);
                stream
            }
            Err(e) => {
                self.stats.backend_failed.fetch_add(1, Ordering::Relaxed);
                warn!(server = %backend.name, address = %backend, error = %e, "Backend connect failed");
                return Ok(());
            }
        };
        debug!(server = %backend.name, address = %backend, login, "Connected to backend");

        upstream.write_all(handshake_frame.as_bytes()).await?;

        let (to_backend, from_backend) =
            tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
        self.stats
            .bytes_to_backend
            .fetch_add(to_backend, Ordering::Relaxed);
        self.stats
            .bytes_from_backend
            .fetch_add(from_backend, Ordering::Relaxed);

        debug!(to_backend, from_backend, "Connection closed");
        Ok(())
    }

    async fn connect(&self, backend: &BackendServer) -> io::Result<TcpStream> {
        let connect = TcpStream::connect((backend.host.as_str(), backend.port));
        match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout")),
        }
    }
}

async fn disconnect(client: &mut TcpStream, message: &DisconnectMessage) -> io::Result<()> {
    client.write_all(&login_disconnect(message)).await?;
    client.shutdown().await
}
