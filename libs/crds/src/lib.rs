//! # shulker-crds
//!
//! Cluster resource models consumed by the Shulker proxy agent.
//!
//! ## Resources
//!
//! - `Proxy`: one per running proxy pod. The operator signals a drain request
//!   by setting the `proxy.shulkermc.io/drain` annotation to `"true"`.
//! - `MinecraftServer`: a backend game server. Its spec carries routing tags,
//!   its status carries a `Ready` condition and the server address.
//!
//! ## Watch Notifications
//!
//! Watch streams deliver `(WatchAction, snapshot)` pairs at least once. Order is
//! only meaningful per resource identity.

mod condition;
mod minecraft_server;
mod proxy;
mod watch;

pub use condition::{Condition, ConditionStatus, READY_CONDITION};
pub use minecraft_server::{
    MinecraftServer, MinecraftServerSpec, MinecraftServerStatus, DEFAULT_SERVER_PORT,
};
pub use proxy::{drain_requested, Proxy, ProxySpec, PROXY_DRAIN_ANNOTATION};
pub use watch::{WatchAction, WatchEvent};

/// API group of every Shulker custom resource.
pub const API_GROUP: &str = "shulkermc.io";

/// API version served for the resources in this crate.
pub const API_VERSION: &str = "v1alpha1";
