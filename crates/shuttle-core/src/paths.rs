//! Well-known file locations under a workspace's `.shuttle/` directory.

use std::path::{Path, PathBuf};

/// Name of the per-workspace directory holding daemon files.
pub const SHUTTLE_DIR: &str = ".shuttle";

/// Resolves every file the daemon and CLI share inside one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    /// Paths rooted at `workspace` (the repository the daemon orchestrates).
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            root: workspace.into(),
        }
    }

    /// The workspace root itself; jobs run with this as their working directory.
    pub fn workspace(&self) -> &Path {
        &self.root
    }

    /// `.shuttle/`
    pub fn shuttle_dir(&self) -> PathBuf {
        self.root.join(SHUTTLE_DIR)
    }

    /// `.shuttle/config.toml`
    pub fn config_file(&self) -> PathBuf {
        self.shuttle_dir().join("config.toml")
    }

    /// `.shuttle/daemon-state.json`
    pub fn state_file(&self) -> PathBuf {
        self.shuttle_dir().join("daemon-state.json")
    }

    /// `.shuttle/archive/`
    pub fn archive_dir(&self) -> PathBuf {
        self.shuttle_dir().join("archive")
    }

    /// `.shuttle/stop-daemon` -- raised by an operator, cleared on shutdown.
    pub fn stop_signal(&self) -> PathBuf {
        self.shuttle_dir().join("stop-daemon")
    }

    /// `.shuttle/stop-workers` -- raised by the coordinator while draining.
    pub fn drain_signal(&self) -> PathBuf {
        self.shuttle_dir().join("stop-workers")
    }

    /// `.shuttle/daemon.pid`
    pub fn pid_file(&self) -> PathBuf {
        self.shuttle_dir().join("daemon.pid")
    }
}
