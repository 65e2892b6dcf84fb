//! Shulker Proxy Agent Library
//!
//! The agent runs next to a game proxy and reconciles it against the cluster's
//! `Proxy` and `MinecraftServer` resources.
//!
//! ## Architecture
//!
//! ```text
//! ClusterGateway ──Proxy watch──────────> DrainLifecycle ──> ConnectionGate
//!       │                                       │                  │
//!       └──MinecraftServer watch + list──> DirectoryReconciler     │
//!                                               │                  │
//!                                          ProxyHost <──── Listener (players)
//! ```
//!
//! ## Modules
//!
//! - `agent`: Startup wiring and watch workers
//! - `directory`: Backend registration and tag index
//! - `lifecycle`: Drain state machine and connection gate
//! - `gateway`: Cluster access (Kubernetes and in-memory)
//! - `host`: Host proxy capabilities and the in-process registry
//! - `proxy`: Front listener and handshake framing

pub mod agent;
pub mod config;
pub mod directory;
pub mod gateway;
pub mod host;
pub mod lifecycle;
pub mod limbo;
pub mod marker;
pub mod message;
pub mod proxy;

pub use agent::{Agent, AgentError};
pub use config::{Config, ProxyIdentity};
pub use directory::{DirectoryChange, DirectoryReconciler, ReadinessPolicy};
pub use gateway::{ClusterGateway, GatewayError, KubeGateway, MockGateway, StatusEvent};
pub use host::{BackendServer, ProxyHost, ServerRegistry};
pub use lifecycle::{
    ConnectionGate, DrainError, DrainLifecycle, DrainTimings, GateDecision, LifecycleMode,
    LifecyclePhase,
};
pub use limbo::{LimboSelector, ServerSelection, LIMBO_TAG};
pub use marker::{DrainMarker, FileDrainMarker};
