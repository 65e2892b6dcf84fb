//! Kubernetes-backed gateway.
//!
//! Watches use `kube::runtime::watcher` with the default backoff. The watcher
//! re-lists after failures, so the producer tracks which names it has already
//! reported: relisted objects map to `Modified` rather than `Added`, and
//! objects missing from a relist are reported as `Deleted`.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use futures_util::TryStreamExt;
use k8s_openapi::api::core::v1::Event;
use kube::api::{ListParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use shulker_crds::{MinecraftServer, Proxy, WatchAction, WatchEvent, API_GROUP, API_VERSION};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    ClusterGateway, GatewayError, StatusEvent, WatchSubscription, REPORTING_COMPONENT,
    WATCH_BUFFER,
};
use crate::config::ProxyIdentity;

/// Gateway talking to the cluster API server.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    proxy: ProxyIdentity,
}

impl KubeGateway {
    /// Build a client from the in-cluster (or local kubeconfig) configuration.
    pub async fn connect(proxy: ProxyIdentity) -> Result<Self, GatewayError> {
        let client = Client::try_default().await?;
        info!(proxy = %proxy, "Connected to Kubernetes API");
        Ok(Self::with_client(client, proxy))
    }

    pub fn with_client(client: Client, proxy: ProxyIdentity) -> Self {
        Self { client, proxy }
    }

    fn spawn_watch<K>(
        kind: &'static str,
        api: Api<K>,
        config: watcher::Config,
    ) -> WatchSubscription<K>
    where
        K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);

        let producer = tokio::spawn(async move {
            let stream = watcher::watcher(api, config).default_backoff();
            futures_util::pin_mut!(stream);

            let mut tracker = WatchTracker::default();
            loop {
                let event = match stream.try_next().await {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        warn!(kind, "Watch stream ended");
                        return;
                    }
                    Err(e) => {
                        warn!(kind, error = %e, "Watch error, backing off");
                        continue;
                    }
                };

                for event in tracker.translate(event) {
                    debug!(
                        kind,
                        action = %event.action,
                        name = %event.object.name_any(),
                        "Watch notification"
                    );
                    if tx.send(event).await.is_err() {
                        debug!(kind, "Watch subscriber dropped");
                        return;
                    }
                }
            }
        });

        WatchSubscription::new(rx, Some(producer.abort_handle()))
    }
}

/// Objects reported to the subscriber so far, by name.
struct WatchTracker<K> {
    known: BTreeMap<String, K>,
    /// Names seen since the last `Init`, while a relist is in progress.
    relisted: Option<HashSet<String>>,
}

impl<K> Default for WatchTracker<K> {
    fn default() -> Self {
        Self {
            known: BTreeMap::new(),
            relisted: None,
        }
    }
}

impl<K> WatchTracker<K>
where
    K: Resource + Clone,
{
    /// Map a watcher event onto the agent's add/modify/delete model.
    fn translate(&mut self, event: watcher::Event<K>) -> Vec<WatchEvent<K>> {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(obj.name_any());
                }
                vec![self.apply(obj)]
            }
            watcher::Event::Apply(obj) => vec![self.apply(obj)],
            watcher::Event::Delete(obj) => {
                self.known.remove(&obj.name_any());
                vec![WatchEvent::deleted(obj)]
            }
            watcher::Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return Vec::new();
                };
                let (kept, gone): (BTreeMap<_, _>, BTreeMap<_, _>) =
                    std::mem::take(&mut self.known)
                        .into_iter()
                        .partition(|(name, _)| relisted.contains(name));
                self.known = kept;
                gone.into_values().map(WatchEvent::deleted).collect()
            }
        }
    }

    fn apply(&mut self, obj: K) -> WatchEvent<K> {
        let action = match self.known.insert(obj.name_any(), obj.clone()) {
            None => WatchAction::Added,
            Some(_) => WatchAction::Modified,
        };
        WatchEvent::new(action, obj)
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn watch_proxy(&self) -> Result<WatchSubscription<Proxy>, GatewayError> {
        let api: Api<Proxy> = Api::namespaced(self.client.clone(), &self.proxy.namespace);
        let config = watcher::Config::default().fields(&format!("metadata.name={}", self.proxy.name));

        info!(proxy = %self.proxy, "Watching Proxy resource");
        Ok(Self::spawn_watch("Proxy", api, config))
    }

    async fn watch_minecraft_servers(
        &self,
    ) -> Result<WatchSubscription<MinecraftServer>, GatewayError> {
        let api: Api<MinecraftServer> =
            Api::namespaced(self.client.clone(), &self.proxy.namespace);

        info!(namespace = %self.proxy.namespace, "Watching MinecraftServer resources");
        Ok(Self::spawn_watch(
            "MinecraftServer",
            api,
            watcher::Config::default(),
        ))
    }

    async fn list_minecraft_servers(&self) -> Result<Vec<MinecraftServer>, GatewayError> {
        let api: Api<MinecraftServer> =
            Api::namespaced(self.client.clone(), &self.proxy.namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn emit(&self, event: StatusEvent) -> Result<(), GatewayError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let object: Event = serde_json::from_value(json!({
            "metadata": {
                "namespace": self.proxy.namespace,
                "generateName": format!("{}-", self.proxy.name),
            },
            "involvedObject": {
                "apiVersion": format!("{API_GROUP}/{API_VERSION}"),
                "kind": "Proxy",
                "namespace": self.proxy.namespace,
                "name": self.proxy.name,
            },
            "source": { "component": REPORTING_COMPONENT },
            "type": event.event_type(),
            "reason": event.reason(),
            "message": event.message(),
            "firstTimestamp": now,
            "lastTimestamp": now,
            "count": 1,
        }))?;

        let api: Api<Event> = Api::namespaced(self.client.clone(), &self.proxy.namespace);
        api.create(&PostParams::default(), &object).await?;

        debug!(reason = event.reason(), "Status event emitted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shulker_crds::ProxySpec;

    fn proxy(name: &str) -> Proxy {
        Proxy::new(name, ProxySpec::default())
    }

    fn names(events: &[WatchEvent<Proxy>]) -> Vec<(WatchAction, String)> {
        events
            .iter()
            .map(|e| (e.action, e.object.name_any()))
            .collect()
    }

    #[test]
    fn test_first_apply_is_added_then_modified() {
        let mut tracker = WatchTracker::default();

        let first = tracker.translate(watcher::Event::Apply(proxy("p")));
        assert_eq!(names(&first), vec![(WatchAction::Added, "p".to_string())]);

        let second = tracker.translate(watcher::Event::Apply(proxy("p")));
        assert_eq!(names(&second), vec![(WatchAction::Modified, "p".to_string())]);
    }

    #[test]
    fn test_relist_of_known_object_is_modified() {
        let mut tracker: WatchTracker<Proxy> = WatchTracker::default();
        tracker.translate(watcher::Event::Init);
        tracker.translate(watcher::Event::InitApply(proxy("p")));
        tracker.translate(watcher::Event::InitDone);

        assert!(tracker.translate(watcher::Event::Init).is_empty());
        let relisted = tracker.translate(watcher::Event::InitApply(proxy("p")));
        assert_eq!(names(&relisted), vec![(WatchAction::Modified, "p".to_string())]);
        assert!(tracker.translate(watcher::Event::InitDone).is_empty());
    }

    #[test]
    fn test_object_missing_from_relist_is_deleted() {
        let mut tracker: WatchTracker<Proxy> = WatchTracker::default();
        tracker.translate(watcher::Event::Init);
        tracker.translate(watcher::Event::InitApply(proxy("gone")));
        tracker.translate(watcher::Event::InitApply(proxy("kept")));
        tracker.translate(watcher::Event::InitDone);

        tracker.translate(watcher::Event::Init);
        let relisted = tracker.translate(watcher::Event::InitApply(proxy("kept")));
        assert_eq!(names(&relisted), vec![(WatchAction::Modified, "kept".to_string())]);

        let done = tracker.translate(watcher::Event::InitDone);
        assert_eq!(names(&done), vec![(WatchAction::Deleted, "gone".to_string())]);
        assert!(!tracker.known.contains_key("gone"));
        assert!(tracker.known.contains_key("kept"));

        let readded = tracker.translate(watcher::Event::Apply(proxy("gone")));
        assert_eq!(names(&readded), vec![(WatchAction::Added, "gone".to_string())]);
    }

    #[test]
    fn test_delete_forgets_object() {
        let mut tracker: WatchTracker<Proxy> = WatchTracker::default();
        tracker.translate(watcher::Event::Apply(proxy("p")));

        let deleted = tracker.translate(watcher::Event::Delete(proxy("p")));
        assert_eq!(names(&deleted), vec![(WatchAction::Deleted, "p".to_string())]);

        let readded = tracker.translate(watcher::Event::Apply(proxy("p")));
        assert_eq!(names(&readded), vec![(WatchAction::Added, "p".to_string())]);
    }
}
