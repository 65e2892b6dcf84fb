//! Limbo routing.
//!
//! Players asking for the `limbo` server are sent to a registered backend
//! tagged `limbo`. Any other server name passes through.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::directory::DirectoryReconciler;
use crate::host::{BackendServer, ProxyHost};
use crate::message::{DisconnectMessage, NO_LIMBO_FOUND};

/// Tag (and requested server name) designating limbo backends.
pub const LIMBO_TAG: &str = "limbo";

/// Outcome of a server selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerSelection {
    /// Not a limbo request; route to the requested server as-is.
    Passthrough,
    /// Route to this limbo backend.
    Selected(BackendServer),
    /// No limbo backend available.
    Disconnect(DisconnectMessage),
}

pub struct LimboSelector {
    directory: Arc<DirectoryReconciler>,
    host: Arc<dyn ProxyHost>,
}

impl LimboSelector {
    pub fn new(directory: Arc<DirectoryReconciler>, host: Arc<dyn ProxyHost>) -> Self {
        Self { directory, host }
    }

    /// Pick a backend for a player asking for `requested`.
    ///
    /// Candidates are tried in name order; an index entry whose backend is
    /// no longer registered is skipped.
    pub fn select(&self, requested: &str) -> ServerSelection {
        if requested != LIMBO_TAG {
            return ServerSelection::Passthrough;
        }

        let backend = self
            .directory
            .lookup_by_tag(LIMBO_TAG)
            .iter()
            .find_map(|name| self.host.get_backend(name));

        match backend {
            Some(backend) => {
                debug!(server = %backend.name, "Selected limbo server");
                ServerSelection::Selected(backend)
            }
            None => {
                warn!("No limbo server found");
                ServerSelection::Disconnect(NO_LIMBO_FOUND)
            }
        }
    }
}
