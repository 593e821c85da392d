//! Shuttle Daemon Library
//!
//! Core functionality for the Shuttle daemon:
//! - Spawn interface for agent jobs and post-spawn verification
//! - Read-only access to the issue backlog
//! - Bounded worker pool and the decision engine
//! - Control loop with cooperative drain on shutdown

pub mod backlog;
pub mod launcher;
pub mod orchestration;

use shuttle_core::config::Config;
use shuttle_core::paths::WorkspacePaths;
use shuttle_core::signals::SignalFiles;
use shuttle_core::store::StateStore;

use backlog::GhBacklog;
use launcher::ProcessLauncher;
use launcher::process::LauncherConfig;
use orchestration::{ControlLoop, Orchestrator};

/// Control loop wired to the agent subprocess launcher and the `gh` backlog.
pub fn build_control_loop(
    config: Config,
    paths: &WorkspacePaths,
) -> ControlLoop<ProcessLauncher, GhBacklog> {
    let launcher = ProcessLauncher::new(LauncherConfig::from_config(&config, paths));
    let backlog = GhBacklog::new(&config, paths.workspace().to_path_buf());
    let orchestrator = Orchestrator::new(
        config,
        launcher,
        backlog,
        StateStore::for_workspace(paths),
        SignalFiles::for_workspace(paths),
    );
    ControlLoop::new(orchestrator)
}

/// Command-line overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub force: bool,
    pub debug: bool,
    pub strict: bool,
    pub resume: bool,
    pub max_workers: Option<usize>,
    pub poll_interval_secs: Option<u64>,
}

impl RunOptions {
    /// Flags only ever switch modes on; unset values keep the config's.
    pub fn apply(&self, config: &mut Config) {
        config.force_mode |= self.force;
        config.debug_mode |= self.debug;
        config.strict_validation |= self.strict;
        if let Some(n) = self.max_workers {
            config.max_workers = n;
        }
        if let Some(secs) = self.poll_interval_secs {
            config.poll_interval_secs = secs;
        }
    }
}

/// Start the daemon in `paths`, run it until shutdown and return the final
/// state. `on_ready` runs once startup succeeded, before the first iteration.
pub async fn run_daemon(
    config: Config,
    paths: &WorkspacePaths,
    resume: bool,
    shutdown: tokio::sync::watch::Receiver<bool>,
    on_ready: impl FnOnce(),
) -> Result<shuttle_core::DaemonState, orchestration::StartupError> {
    let mut control = build_control_loop(config, paths).resume(resume);
    let state = control.start()?;
    on_ready();
    Ok(control.run(state, shutdown).await)
}
