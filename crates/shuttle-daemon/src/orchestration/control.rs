//! Control loop and shutdown coordinator.
//!
//! The loop moves through `Stopped -> Starting -> Running -> Draining ->
//! Stopped`. Shutdown is requested either by the stop signal file or by the
//! in-process watch channel that OS signals feed into; both lead to the same
//! drain: raise the drain signal, wait (bounded) for workers to exit, then
//! clear the signals and persist the final state. Jobs are never killed.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use shuttle_core::config::Config;
use shuttle_core::state::{DaemonState, Warning, WarningKind, unix_timestamp};
use shuttle_core::store::StoreError;

use super::iteration::Orchestrator;
use crate::backlog::Backlog;
use crate::launcher::{Launcher, is_process_alive};

/// Lifecycle phase of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonPhase {
    Stopped,
    Starting,
    Running,
    Draining,
}

impl fmt::Display for DaemonPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
        })
    }
}

/// Sleep and wait durations used by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    pub poll_interval: Duration,
    pub drain_timeout: Duration,
    pub drain_poll: Duration,
}

impl LoopTiming {
    pub const fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            drain_timeout: config.drain_timeout(),
            drain_poll: config.drain_poll(),
        }
    }
}

/// Errors that prevent the daemon from reaching `Running`.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Configuration is invalid: {issues}")]
    ConfigValidation { issues: String },

    #[error("Another daemon is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to write {what}: {source}")]
    Io {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Drives iterations until shutdown.
pub struct ControlLoop<L, B> {
    orchestrator: Orchestrator<L, B>,
    timing: LoopTiming,
    phase: DaemonPhase,
    resume: bool,
}

impl<L: Launcher + Sync, B: Backlog + Sync> ControlLoop<L, B> {
    pub fn new(orchestrator: Orchestrator<L, B>) -> Self {
        let timing = LoopTiming::from_config(orchestrator.config());
        Self {
            orchestrator,
            timing,
            phase: DaemonPhase::Stopped,
            resume: false,
        }
    }

    #[must_use]
    pub const fn with_timing(mut self, timing: LoopTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Keep the previous state file instead of archiving it.
    #[must_use]
    pub const fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub const fn phase(&self) -> DaemonPhase {
        self.phase
    }

    pub const fn orchestrator(&self) -> &Orchestrator<L, B> {
        &self.orchestrator
    }

    /// Prepare state and claim the workspace.
    ///
    /// On success the pid file is written and the returned state is marked
    /// running; pass it to [`ControlLoop::run`].
    pub fn start(&mut self) -> Result<DaemonState, StartupError> {
        self.phase = DaemonPhase::Starting;
        let result = self.try_start();
        if result.is_err() {
            self.phase = DaemonPhase::Stopped;
        }
        result
    }

    fn try_start(&self) -> Result<DaemonState, StartupError> {
        let now = unix_timestamp();
        let config = self.orchestrator.config();
        let store = self.orchestrator.store();
        let signals = self.orchestrator.signals();

        if let Some(pid) = signals.read_pid() {
            if pid != std::process::id() && is_process_alive(pid) {
                return Err(StartupError::AlreadyRunning { pid });
            }
            debug!(pid, "Ignoring stale pid file");
        }

        let issues = config.validate();
        if config.strict_validation && !issues.is_empty() {
            let issues = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(StartupError::ConfigValidation { issues });
        }

        if !self.resume {
            store.rotate(now)?;
            store.prune_archive(config.archive_keep)?;
        }

        let (mut state, corrupt) = store.load_or_default(now);
        if let Some(warning) = corrupt {
            state.push_warning(warning);
        }
        for issue in &issues {
            warn!(issue = %issue, "Configuration issue");
            state.push_warning(Warning::new(now, WarningKind::ConfigValidation, issue.to_string()));
        }

        // A stop request left over from before this run must not end it.
        signals.clear().map_err(|source| StartupError::Io {
            what: "signal files",
            source,
        })?;
        signals
            .write_pid(std::process::id())
            .map_err(|source| StartupError::Io {
                what: "pid file",
                source,
            })?;

        state.running = true;
        state.started_at = now;
        state.stopped_at = None;
        state.force_mode = config.force_mode;
        state.debug_mode = config.debug_mode;
        store.save(&state)?;

        info!(
            resume = self.resume,
            workers = state.workers.len(),
            max_workers = self.orchestrator.pool().capacity(),
            poll_interval_secs = self.timing.poll_interval.as_secs(),
            force = config.force_mode,
            "Daemon started"
        );
        Ok(state)
    }

    /// Run until a stop is requested, drain, and return the final state.
    pub async fn run(
        &mut self,
        mut state: DaemonState,
        mut shutdown: watch::Receiver<bool>,
    ) -> DaemonState {
        self.phase = DaemonPhase::Running;

        loop {
            if self.stop_requested(&shutdown) {
                info!("Stop requested");
                break;
            }

            let mut summary = self
                .orchestrator
                .run_iteration(&mut state, unix_timestamp())
                .await;
            summary.shutdown |= *shutdown.borrow();
            info!("{summary}");
            if summary.shutdown {
                break;
            }

            sleep_or_shutdown(self.timing.poll_interval, &mut shutdown).await;
        }

        self.drain(&mut state).await;
        self.finish(&mut state);
        state
    }

    fn stop_requested(&self, shutdown: &watch::Receiver<bool>) -> bool {
        *shutdown.borrow() || self.orchestrator.signals().stop_requested()
    }

    /// Ask workers to wind down and wait for them, up to the drain timeout.
    async fn drain(&mut self, state: &mut DaemonState) {
        self.phase = DaemonPhase::Draining;
        let signals = self.orchestrator.signals();
        if let Err(e) = signals.raise_drain(unix_timestamp()) {
            warn!(error = %e, "Failed to raise drain signal");
        }
        info!(
            workers = state.active_workers(),
            timeout_secs = self.timing.drain_timeout.as_secs(),
            "Draining workers"
        );

        let deadline = Instant::now() + self.timing.drain_timeout;
        loop {
            let outcomes = self
                .orchestrator
                .pool()
                .reconcile(state, self.orchestrator.launcher(), unix_timestamp())
                .await;
            for outcome in &outcomes {
                info!("{outcome}");
            }

            if state.active_workers() == 0 {
                info!("All workers exited");
                return;
            }

            let now = Instant::now();
            if now >= deadline {
                let remaining: Vec<&str> = state.workers.keys().map(String::as_str).collect();
                let message = format!(
                    "drain timed out with {} worker(s) still running: {}",
                    remaining.len(),
                    remaining.join(", ")
                );
                warn!(remaining = ?remaining, "Drain timed out, leaving workers running");
                state.push_warning(Warning::new(unix_timestamp(), WarningKind::DrainTimeout, message));
                return;
            }

            tokio::time::sleep(self.timing.drain_poll.min(deadline - now)).await;
        }
    }

    fn finish(&mut self, state: &mut DaemonState) {
        let signals = self.orchestrator.signals();
        if let Err(e) = signals.clear() {
            warn!(error = %e, "Failed to clear signal files");
        }
        if let Err(e) = signals.remove_pid() {
            warn!(error = %e, "Failed to remove pid file");
        }

        state.running = false;
        state.stopped_at = Some(unix_timestamp());
        if let Err(e) = self.orchestrator.store().save(state) {
            warn!(error = %e, "Failed to persist final state");
        }

        self.phase = DaemonPhase::Stopped;
        info!(
            iterations = state.iteration_count,
            workers_spawned = state.totals.workers_spawned,
            remaining_workers = state.active_workers(),
            "Daemon stopped"
        );
    }
}

/// Sleep for `duration`, returning early if `shutdown` flips.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        () = tokio::time::sleep(duration) => {}
        changed = shutdown.changed() => {
            // Sender gone: nothing can wake us early any more.
            if changed.is_err() {
                tokio::time::sleep(duration).await;
            }
        }
    }
}

/// Forward Ctrl+C and SIGTERM into `shutdown`.
pub fn spawn_signal_listener(shutdown: watch::Sender<bool>) -> std::io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        #[cfg(unix)]
        let sigterm_future = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_future = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
            }
            _ = sigterm_future => {
                info!("Received SIGTERM shutdown signal");
            }
        }
        let _ = shutdown.send(true);
    }))
}
