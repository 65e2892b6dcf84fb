//! The `MinecraftServer` custom resource.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::condition::{find_condition, Condition, READY_CONDITION};

/// Port every backend listens on inside the cluster.
pub const DEFAULT_SERVER_PORT: u16 = 25565;

/// Desired state of a backend server.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "shulkermc.io",
    version = "v1alpha1",
    kind = "MinecraftServer",
    plural = "minecraftservers",
    namespaced,
    status = "MinecraftServerStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct MinecraftServerSpec {
    /// Routing tags (for example `lobby` or `limbo`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Observed state of a backend server.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MinecraftServerStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Pod IP of the server, set once it has been scheduled.
    #[serde(rename = "serverIP", default, skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<String>,
}

impl MinecraftServerStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        find_condition(&self.conditions, type_)
    }

    /// True when the `Ready` condition exists with status `"True"`.
    pub fn is_ready(&self) -> bool {
        self.condition(READY_CONDITION).is_some_and(Condition::is_true)
    }
}

impl MinecraftServer {
    /// Tags from the spec; an absent list is empty.
    pub fn tags(&self) -> &[String] {
        self.spec.tags.as_deref().unwrap_or_default()
    }

    /// Readiness as last reported. A missing status is not ready.
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(MinecraftServerStatus::is_ready)
    }
}
