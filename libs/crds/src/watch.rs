//! Watch notification types.

/// Kind of change carried by a watch notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchAction {
    Added,
    Modified,
    Deleted,
}

impl WatchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for WatchAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single notification: the action and the resource snapshot it applies to.
#[derive(Debug, Clone)]
pub struct WatchEvent<T> {
    pub action: WatchAction,
    pub object: T,
}

impl<T> WatchEvent<T> {
    pub fn new(action: WatchAction, object: T) -> Self {
        Self { action, object }
    }

    pub fn added(object: T) -> Self {
        Self::new(WatchAction::Added, object)
    }

    pub fn modified(object: T) -> Self {
        Self::new(WatchAction::Modified, object)
    }

    pub fn deleted(object: T) -> Self {
        Self::new(WatchAction::Deleted, object)
    }
}
