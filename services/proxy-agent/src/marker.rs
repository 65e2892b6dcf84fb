//! Local drain marker file.
//!
//! Once the proxy stops accepting players it drops an empty marker file into a
//! lock directory shared with the pod's other containers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

/// File name created inside the lock directory.
pub const DRAIN_FILE_NAME: &str = "drain-lock";

/// Creates the on-disk drain marker.
pub trait DrainMarker: Send + Sync {
    fn create_drain_file(&self) -> io::Result<()>;
}

/// Marker backed by a file in a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileDrainMarker {
    lock_dir: PathBuf,
}

impl FileDrainMarker {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.lock_dir.join(DRAIN_FILE_NAME)
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }
}

impl DrainMarker for FileDrainMarker {
    fn create_drain_file(&self) -> io::Result<()> {
        fs::create_dir_all(&self.lock_dir)?;
        let path = self.path();
        fs::write(&path, b"")?;
        info!(path = %path.display(), "Drain file created");
        Ok(())
    }
}
