//! The `Proxy` custom resource.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Annotation set by the operator to ask a proxy to drain.
pub const PROXY_DRAIN_ANNOTATION: &str = "proxy.shulkermc.io/drain";

/// Desired state of a proxy. The agent never reads it.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "shulkermc.io",
    version = "v1alpha1",
    kind = "Proxy",
    plural = "proxies",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ref: Option<String>,
}

impl Proxy {
    /// Whether this snapshot carries a drain request.
    pub fn drain_requested(&self) -> bool {
        drain_requested(self.metadata.annotations.as_ref())
    }
}

/// Returns true only when the drain annotation holds the literal `"true"`.
///
/// Absence, `"false"`, empty and any other spelling all mean "not requested".
pub fn drain_requested(annotations: Option<&BTreeMap<String, String>>) -> bool {
    annotations
        .and_then(|a| a.get(PROXY_DRAIN_ANNOTATION))
        .is_some_and(|v| v == "true")
}
