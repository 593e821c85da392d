//! Durable storage for [`DaemonState`].
//!
//! The store is the only persistence boundary of the daemon. Writes are
//! atomic (temp file + `rename`), so a crash mid-write leaves either the old
//! or the new state on disk, never a truncated one. Each fresh run archives
//! the previous state file instead of overwriting it.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::paths::WorkspacePaths;
use crate::state::{DaemonState, Warning, WarningKind};

/// Default number of archived state files kept by [`StateStore::prune_archive`].
pub const DEFAULT_ARCHIVE_KEEP: usize = 10;

const ARCHIVE_PREFIX: &str = "state-";

/// Errors from state persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The persisted record exists but cannot be parsed.
    #[error("State file {path} is corrupt: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("State I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File-backed state store.
#[derive(Debug, Clone)]
pub struct StateStore {
    state_file: PathBuf,
    archive_dir: PathBuf,
}

impl StateStore {
    pub fn new(state_file: PathBuf, archive_dir: PathBuf) -> Self {
        Self {
            state_file,
            archive_dir,
        }
    }

    /// Store at the workspace's standard locations.
    pub fn for_workspace(paths: &WorkspacePaths) -> Self {
        Self::new(paths.state_file(), paths.archive_dir())
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Load the persisted state.
    ///
    /// A missing file is not an error: it yields a default state.
    pub fn load(&self) -> Result<DaemonState, StoreError> {
        let content = match fs::read_to_string(&self.state_file) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.state_file.display(), "No state file, starting fresh");
                return Ok(DaemonState::default());
            }
            Err(e) => return Err(StoreError::io(&self.state_file, e)),
        };
        serde_json::from_str(&content).map_err(|e| StoreError::CorruptState {
            path: self.state_file.clone(),
            reason: e.to_string(),
        })
    }

    /// Load the persisted state, falling back to defaults when it is corrupt
    /// or unreadable.
    ///
    /// The returned warning (if any) should be appended to the state by the
    /// caller so it shows up in `status` output.
    pub fn load_or_default(&self, now: u64) -> (DaemonState, Option<Warning>) {
        match self.load() {
            Ok(state) => (state, None),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable state, starting from defaults");
                (
                    DaemonState::default(),
                    Some(Warning::new(now, WarningKind::CorruptState, e.to_string())),
                )
            }
        }
    }

    /// Atomically persist `state`.
    pub fn save(&self, state: &DaemonState) -> Result<(), StoreError> {
        if let Some(parent) = self.state_file.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(state)?;

        let tmp = self.state_file.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
            file.write_all(&json).map_err(|e| StoreError::io(&tmp, e))?;
            file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
        }
        fs::rename(&tmp, &self.state_file).map_err(|e| StoreError::io(&self.state_file, e))?;
        debug!(path = %self.state_file.display(), bytes = json.len(), "State saved");
        Ok(())
    }

    /// Move any existing state file into the archive directory.
    ///
    /// Returns the archive path, or `None` if there was nothing to rotate.
    pub fn rotate(&self, now: u64) -> Result<Option<PathBuf>, StoreError> {
        if !self.state_file.exists() {
            return Ok(None);
        }
        fs::create_dir_all(&self.archive_dir).map_err(|e| StoreError::io(&self.archive_dir, e))?;

        let mut target = self.archive_dir.join(format!("{ARCHIVE_PREFIX}{now}.json"));
        let mut suffix = 1;
        while target.exists() {
            target = self
                .archive_dir
                .join(format!("{ARCHIVE_PREFIX}{now}-{suffix}.json"));
            suffix += 1;
        }

        fs::rename(&self.state_file, &target).map_err(|e| StoreError::io(&self.state_file, e))?;
        info!(archive = %target.display(), "Rotated previous daemon state");
        Ok(Some(target))
    }

    /// Delete the oldest archives so at most `keep` remain.
    ///
    /// Returns the number of files removed.
    pub fn prune_archive(&self, keep: usize) -> Result<usize, StoreError> {
        let entries = match fs::read_dir(&self.archive_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::io(&self.archive_dir, e)),
        };

        let mut archives: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(ARCHIVE_PREFIX))
            })
            .collect();
        if archives.len() <= keep {
            return Ok(0);
        }

        // Timestamps have a fixed width for the foreseeable future, so name
        // order is age order.
        archives.sort();
        let excess = archives.len() - keep;
        for path in &archives[..excess] {
            fs::remove_file(path).map_err(|e| StoreError::io(path, e))?;
        }
        debug!(removed = excess, "Pruned state archive");
        Ok(excess)
    }
}
