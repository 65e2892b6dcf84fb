//! Server directory reconciler.
//!
//! Folds `MinecraftServer` notifications into two views:
//! - the host's registered backends (name → address)
//! - a tag index (tag → backend names) used for routing selection
//!
//! Registration happens once per name, on the first notification whose
//! snapshot is ready and carries an address. Later ready notifications only
//! add tags. Removal is driven by `Deleted`, and additionally by loss of
//! readiness under `ReadinessPolicy::UnregisterWhenNotReady`.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use shulker_crds::{MinecraftServer, WatchAction, WatchEvent, DEFAULT_SERVER_PORT};
use thiserror::Error;
use tracing::{debug, info};

use crate::host::{BackendServer, ProxyHost};

// =============================================================================
// Readiness policy
// =============================================================================

/// What a registered backend losing readiness does to the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadinessPolicy {
    /// Keep it routable until the resource is deleted.
    #[default]
    RetainUntilDeleted,
    /// Unregister it as soon as a not-ready snapshot is observed.
    UnregisterWhenNotReady,
}

impl ReadinessPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetainUntilDeleted => "retain-until-deleted",
            Self::UnregisterWhenNotReady => "unregister-when-not-ready",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown readiness policy '{0}'")]
pub struct ParseReadinessPolicyError(String);

impl FromStr for ReadinessPolicy {
    type Err = ParseReadinessPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "retain-until-deleted" => Ok(Self::RetainUntilDeleted),
            "unregister-when-not-ready" => Ok(Self::UnregisterWhenNotReady),
            other => Err(ParseReadinessPolicyError(other.to_string())),
        }
    }
}

// =============================================================================
// Tag index
// =============================================================================

/// Tag → backend names, published as immutable snapshots.
#[derive(Debug)]
pub struct DirectoryIndex {
    tags: ArcSwap<HashMap<String, BTreeSet<String>>>,
}

impl DirectoryIndex {
    pub fn new() -> Self {
        Self {
            tags: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Index `name` under each tag. Returns the tags that were new for it.
    pub fn insert(&self, name: &str, tags: &[String]) -> Vec<String> {
        let mut added = Vec::new();
        self.tags.rcu(|current| {
            added.clear();
            let mut next = HashMap::clone(current);
            for tag in tags {
                if next.entry(tag.clone()).or_default().insert(name.to_string()) {
                    added.push(tag.clone());
                }
            }
            Arc::new(next)
        });
        added
    }

    /// Drop `name` from every tag. Empty buckets are removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut removed = false;
        self.tags.rcu(|current| {
            removed = current.values().any(|names| names.contains(name));
            if !removed {
                return Arc::clone(current);
            }
            let mut next = HashMap::clone(current);
            next.retain(|_, names| {
                names.remove(name);
                !names.is_empty()
            });
            Arc::new(next)
        });
        removed
    }

    /// Names indexed under `tag`. Unknown tags yield an empty set.
    pub fn lookup(&self, tag: &str) -> BTreeSet<String> {
        self.tags.load().get(tag).cloned().unwrap_or_default()
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<_> = self.tags.load().keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl Default for DirectoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Why a notification left the directory untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Unnamed,
    NoStatus,
    NotReady,
    NoAddress,
    AlreadyRegistered,
    NotRegistered,
}

/// Effect of one notification on the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryChange {
    Registered { name: String, tags: Vec<String> },
    TagsAdded { name: String, tags: Vec<String> },
    Unregistered { name: String },
    Ignored(IgnoreReason),
}

pub struct DirectoryReconciler {
    host: Arc<dyn ProxyHost>,
    index: DirectoryIndex,
    policy: ReadinessPolicy,
}

impl DirectoryReconciler {
    pub fn new(host: Arc<dyn ProxyHost>, policy: ReadinessPolicy) -> Self {
        Self {
            host,
            index: DirectoryIndex::new(),
            policy,
        }
    }

    pub fn policy(&self) -> ReadinessPolicy {
        self.policy
    }

    pub fn index(&self) -> &DirectoryIndex {
        &self.index
    }

    /// Converge on a full listing taken before the watch starts.
    ///
    /// Each entry goes through the `Added` path. Returns how many backends
    /// were registered.
    pub fn bootstrap<I>(&self, servers: I) -> usize
    where
        I: IntoIterator<Item = MinecraftServer>,
    {
        let registered = servers
            .into_iter()
            .map(|server| self.apply(&server))
            .filter(|change| matches!(change, DirectoryChange::Registered { .. }))
            .count();

        info!(registered, "Directory bootstrapped");
        registered
    }

    /// Apply one watch notification.
    pub fn on_watch_event(&self, event: &WatchEvent<MinecraftServer>) -> DirectoryChange {
        let change = match event.action {
            WatchAction::Added | WatchAction::Modified => self.apply(&event.object),
            WatchAction::Deleted => match event.object.metadata.name.as_deref() {
                Some(name) => self.unregister(name),
                None => DirectoryChange::Ignored(IgnoreReason::Unnamed),
            },
        };

        if let DirectoryChange::Ignored(reason) = &change {
            debug!(
                action = %event.action,
                server = event.object.metadata.name.as_deref().unwrap_or_default(),
                reason = ?reason,
                "MinecraftServer notification ignored"
            );
        }
        change
    }

    /// Names of backends indexed under `tag`.
    pub fn lookup_by_tag(&self, tag: &str) -> BTreeSet<String> {
        self.index.lookup(tag)
    }

    fn apply(&self, server: &MinecraftServer) -> DirectoryChange {
        let Some(name) = server.metadata.name.as_deref() else {
            return DirectoryChange::Ignored(IgnoreReason::Unnamed);
        };
        let Some(status) = server.status.as_ref() else {
            return DirectoryChange::Ignored(IgnoreReason::NoStatus);
        };
        let registered = self.host.get_backend(name).is_some();

        if !status.is_ready() {
            return match self.policy {
                ReadinessPolicy::UnregisterWhenNotReady if registered => self.unregister(name),
                _ => DirectoryChange::Ignored(IgnoreReason::NotReady),
            };
        }

        if registered {
            let tags = self.index.insert(name, server.tags());
            if tags.is_empty() {
                return DirectoryChange::Ignored(IgnoreReason::AlreadyRegistered);
            }
            info!(server = %name, tags = ?tags, "Added tags to registered server");
            return DirectoryChange::TagsAdded {
                name: name.to_string(),
                tags,
            };
        }

        let Some(ip) = status.server_ip.as_deref().filter(|ip| !ip.is_empty()) else {
            return DirectoryChange::Ignored(IgnoreReason::NoAddress);
        };

        let backend = BackendServer::new(name, ip, DEFAULT_SERVER_PORT);
        let address = backend.to_string();
        if !self.host.register_backend(backend) {
            return DirectoryChange::Ignored(IgnoreReason::AlreadyRegistered);
        }

        let tags = server.tags().to_vec();
        self.index.insert(name, &tags);
        info!(server = %name, address = %address, tags = ?tags, "Added server to proxy");

        DirectoryChange::Registered {
            name: name.to_string(),
            tags,
        }
    }

    fn unregister(&self, name: &str) -> DirectoryChange {
        let unindexed = self.index.remove(name);
        let removed = self.host.unregister_backend(name).is_some();

        if !removed && !unindexed {
            return DirectoryChange::Ignored(IgnoreReason::NotRegistered);
        }
        info!(server = %name, "Removed server from proxy");
        DirectoryChange::Unregistered {
            name: name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ServerRegistry;
    use proptest::prelude::*;
    use shulker_crds::{Condition, MinecraftServerSpec, MinecraftServerStatus, READY_CONDITION};

    fn server(name: &str, tags: &[&str], ready: bool, ip: Option<&str>) -> MinecraftServer {
        let mut server = MinecraftServer::new(
            name,
            MinecraftServerSpec {
                tags: Some(tags.iter().map(|t| t.to_string()).collect()),
            },
        );
        let status = if ready { "True" } else { "False" };
        server.status = Some(MinecraftServerStatus {
            conditions: vec![Condition::new(READY_CONDITION, status)],
            server_ip: ip.map(str::to_string),
        });
        server
    }

    fn reconciler(policy: ReadinessPolicy) -> (DirectoryReconciler, Arc<ServerRegistry>) {
        let registry = Arc::new(ServerRegistry::new());
        (DirectoryReconciler::new(registry.clone(), policy), registry)
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_bootstrap_registers_ready_servers() {
        let (directory, registry) = reconciler(ReadinessPolicy::default());

        let registered = directory.bootstrap(vec![
            server("lobby-0", &["lobby"], true, Some("10.0.0.4")),
            server("lobby-1", &["lobby"], false, Some("10.0.0.5")),
        ]);

        assert_eq!(registered, 1);
        assert_eq!(directory.lookup_by_tag("lobby"), set(&["lobby-0"]));
        let backend = registry.get_backend("lobby-0").unwrap();
        assert_eq!(backend.to_string(), "10.0.0.4:25565");
    }

    #[test]
    fn test_unknown_tag_is_empty() {
        let (directory, _) = reconciler(ReadinessPolicy::default());
        assert!(directory.lookup_by_tag("nope").is_empty());
    }

    #[test]
    fn test_missing_status_is_ignored() {
        let (directory, registry) = reconciler(ReadinessPolicy::default());
        let mut pending = server("lobby-0", &["lobby"], true, Some("10.0.0.4"));
        pending.status = None;

        assert_eq!(
            directory.on_watch_event(&WatchEvent::added(pending)),
            DirectoryChange::Ignored(IgnoreReason::NoStatus)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ready_without_address_is_ignored() {
        let (directory, registry) = reconciler(ReadinessPolicy::default());
        let change =
            directory.on_watch_event(&WatchEvent::added(server("lobby-0", &["lobby"], true, None)));

        assert_eq!(change, DirectoryChange::Ignored(IgnoreReason::NoAddress));
        assert!(registry.is_empty());
        assert!(directory.lookup_by_tag("lobby").is_empty());
    }

    #[test]
    fn test_registers_once_and_merges_tags() {
        let (directory, registry) = reconciler(ReadinessPolicy::default());

        let first = directory.on_watch_event(&WatchEvent::added(server(
            "game-0",
            &["lobby"],
            true,
            Some("10.0.0.4"),
        )));
        assert!(matches!(first, DirectoryChange::Registered { .. }));

        let second = directory.on_watch_event(&WatchEvent::modified(server(
            "game-0",
            &["lobby", "limbo"],
            true,
            Some("10.0.0.9"),
        )));
        assert_eq!(
            second,
            DirectoryChange::TagsAdded {
                name: "game-0".to_string(),
                tags: vec!["limbo".to_string()],
            }
        );

        let third = directory.on_watch_event(&WatchEvent::modified(server(
            "game-0",
            &[],
            true,
            Some("10.0.0.9"),
        )));
        assert_eq!(third, DirectoryChange::Ignored(IgnoreReason::AlreadyRegistered));

        assert_eq!(registry.get_backend("game-0").unwrap().host, "10.0.0.4");
        assert_eq!(directory.lookup_by_tag("lobby"), set(&["game-0"]));
        assert_eq!(directory.lookup_by_tag("limbo"), set(&["game-0"]));
    }

    #[test]
    fn test_delete_removes_from_everywhere() {
        let (directory, registry) = reconciler(ReadinessPolicy::default());
        let game = server("game-0", &["lobby", "limbo"], true, Some("10.0.0.4"));
        directory.on_watch_event(&WatchEvent::added(game.clone()));

        let change = directory.on_watch_event(&WatchEvent::deleted(game));
        assert_eq!(
            change,
            DirectoryChange::Unregistered {
                name: "game-0".to_string()
            }
        );
        assert!(registry.get_backend("game-0").is_none());
        assert!(directory.lookup_by_tag("lobby").is_empty());
        assert!(directory.lookup_by_tag("limbo").is_empty());
        assert!(directory.index().tags().is_empty());
    }

    #[test]
    fn test_delete_of_unknown_server_is_noop() {
        let (directory, registry) = reconciler(ReadinessPolicy::default());
        directory.on_watch_event(&WatchEvent::added(server(
            "lobby-0",
            &["lobby"],
            true,
            Some("10.0.0.4"),
        )));

        let change = directory.on_watch_event(&WatchEvent::deleted(server(
            "ghost",
            &["lobby"],
            true,
            None,
        )));
        assert_eq!(change, DirectoryChange::Ignored(IgnoreReason::NotRegistered));
        assert_eq!(registry.len(), 1);
        assert_eq!(directory.lookup_by_tag("lobby"), set(&["lobby-0"]));
    }

    #[test]
    fn test_lost_readiness_is_retained_by_default() {
        let (directory, registry) = reconciler(ReadinessPolicy::RetainUntilDeleted);
        directory.on_watch_event(&WatchEvent::added(server(
            "lobby-0",
            &["lobby"],
            true,
            Some("10.0.0.4"),
        )));

        let change = directory.on_watch_event(&WatchEvent::modified(server(
            "lobby-0",
            &["lobby"],
            false,
            Some("10.0.0.4"),
        )));
        assert_eq!(change, DirectoryChange::Ignored(IgnoreReason::NotReady));
        assert!(registry.get_backend("lobby-0").is_some());
        assert_eq!(directory.lookup_by_tag("lobby"), set(&["lobby-0"]));
    }

    #[test]
    fn test_lost_readiness_unregisters_when_configured() {
        let (directory, registry) = reconciler(ReadinessPolicy::UnregisterWhenNotReady);
        directory.on_watch_event(&WatchEvent::added(server(
            "lobby-0",
            &["lobby"],
            true,
            Some("10.0.0.4"),
        )));

        let change = directory.on_watch_event(&WatchEvent::modified(server(
            "lobby-0",
            &["lobby"],
            false,
            Some("10.0.0.4"),
        )));
        assert!(matches!(change, DirectoryChange::Unregistered { .. }));
        assert!(registry.is_empty());
        assert!(directory.lookup_by_tag("lobby").is_empty());

        // Ready again: registered anew.
        let change = directory.on_watch_event(&WatchEvent::modified(server(
            "lobby-0",
            &["lobby"],
            true,
            Some("10.0.0.7"),
        )));
        assert!(matches!(change, DirectoryChange::Registered { .. }));
        assert_eq!(registry.get_backend("lobby-0").unwrap().host, "10.0.0.7");
    }

    #[test]
    fn test_parse_readiness_policy() {
        assert_eq!(
            "retain-until-deleted".parse::<ReadinessPolicy>().unwrap(),
            ReadinessPolicy::RetainUntilDeleted
        );
        assert_eq!(
            " unregister-when-not-ready ".parse::<ReadinessPolicy>().unwrap(),
            ReadinessPolicy::UnregisterWhenNotReady
        );
        assert!("sometimes".parse::<ReadinessPolicy>().is_err());
        assert_eq!(
            ReadinessPolicy::UnregisterWhenNotReady.as_str(),
            "unregister-when-not-ready"
        );
    }

    const TAG_POOL: [&str; 4] = ["lobby", "limbo", "pvp", "event"];

    proptest! {
        #[test]
        fn prop_registration_is_once_and_tags_accumulate(
            notes in prop::collection::vec(
                (any::<bool>(), any::<bool>(), prop::collection::vec(0..TAG_POOL.len(), 0..4)),
                1..24,
            )
        ) {
            let (directory, registry) = reconciler(ReadinessPolicy::RetainUntilDeleted);
            let mut first_ip = None;
            let mut expected = BTreeSet::new();

            for (i, (added, ready, tag_ids)) in notes.iter().enumerate() {
                let tags: Vec<&str> = tag_ids.iter().map(|&t| TAG_POOL[t]).collect();
                let ip = format!("10.0.0.{i}");
                let game = server("game-0", &tags, *ready, Some(&ip));
                let event = if *added { WatchEvent::added(game) } else { WatchEvent::modified(game) };
                directory.on_watch_event(&event);

                if *ready {
                    first_ip.get_or_insert(ip);
                    expected.extend(tags.iter().map(|t| t.to_string()));
                }
            }

            match first_ip {
                Some(ip) => {
                    prop_assert_eq!(registry.len(), 1);
                    prop_assert_eq!(registry.get_backend("game-0").unwrap().host, ip);
                }
                None => prop_assert!(registry.is_empty()),
            }
            for tag in TAG_POOL {
                let indexed = directory.lookup_by_tag(tag).contains("game-0");
                prop_assert_eq!(indexed, expected.contains(tag));
            }
        }
    }
}
