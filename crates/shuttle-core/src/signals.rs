//! Filesystem signal files.
//!
//! Signals are plain marker files polled by their readers:
//! - the stop signal is raised by an operator (`shuttle stop`) and cleared by
//!   the daemon once shutdown completes;
//! - the drain signal is raised by the daemon when it starts draining and is
//!   observed by worker jobs at their own phase boundaries.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::paths::WorkspacePaths;

/// Handle to the stop/drain signal files and the pid file of one workspace.
#[derive(Debug, Clone)]
pub struct SignalFiles {
    stop: PathBuf,
    drain: PathBuf,
    pid: PathBuf,
}

impl SignalFiles {
    pub fn for_workspace(paths: &WorkspacePaths) -> Self {
        Self {
            stop: paths.stop_signal(),
            drain: paths.drain_signal(),
            pid: paths.pid_file(),
        }
    }

    pub fn stop_path(&self) -> &Path {
        &self.stop
    }

    /// Ask the daemon to stop.
    pub fn raise_stop(&self, now: u64) -> io::Result<()> {
        write_marker(&self.stop, &now.to_string())
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.exists()
    }

    /// Ask running workers to wind down at their next safe point.
    pub fn raise_drain(&self, now: u64) -> io::Result<()> {
        write_marker(&self.drain, &now.to_string())
    }

    pub fn drain_raised(&self) -> bool {
        self.drain.exists()
    }

    /// Remove both stop and drain markers. Missing files are fine.
    pub fn clear(&self) -> io::Result<()> {
        remove_if_present(&self.stop)?;
        remove_if_present(&self.drain)
    }

    /// Record the daemon's pid.
    pub fn write_pid(&self, pid: u32) -> io::Result<()> {
        write_marker(&self.pid, &pid.to_string())
    }

    /// Pid recorded by a (possibly dead) daemon, if any.
    pub fn read_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.pid)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn remove_pid(&self) -> io::Result<()> {
        remove_if_present(&self.pid)
    }
}

fn write_marker(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    debug!(path = %path.display(), "Signal raised");
    Ok(())
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Signal cleared");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
