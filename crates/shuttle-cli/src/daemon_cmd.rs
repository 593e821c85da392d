//! `shuttle start` and `shuttle stop`.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::info;

use shuttle_core::config::load_config;
use shuttle_core::paths::WorkspacePaths;
use shuttle_core::signals::SignalFiles;
use shuttle_core::state::unix_timestamp;
use shuttle_daemon::RunOptions;
use shuttle_daemon::launcher::is_process_alive;
use shuttle_daemon::orchestration::spawn_signal_listener;

/// How often `stop --wait` checks the pid file.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Flags for `shuttle start`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct StartArgs {
    /// Let workers merge without review and the champion auto-promote.
    #[arg(long)]
    pub force: bool,

    /// Log why each decision rule did not fire.
    #[arg(long)]
    pub debug: bool,

    /// Refuse to start when the configuration has validation issues.
    #[arg(long)]
    pub strict: bool,

    /// Continue from the previous state file instead of archiving it.
    #[arg(long)]
    pub resume: bool,

    /// Maximum concurrent workers.
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Seconds between iterations.
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Output logs as JSON.
    #[arg(long, env = "SHUTTLE_LOG_JSON")]
    pub log_json: bool,
}

impl StartArgs {
    pub const fn run_options(&self) -> RunOptions {
        RunOptions {
            force: self.force,
            debug: self.debug,
            strict: self.strict,
            resume: self.resume,
            max_workers: self.max_workers,
            poll_interval_secs: self.poll_interval,
        }
    }
}

/// Flags for `shuttle stop`.
#[derive(clap::Args, Debug, Clone)]
pub struct StopArgs {
    /// Block until the daemon has exited.
    #[arg(long)]
    pub wait: bool,

    /// Seconds to wait with `--wait`.
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,
}

/// Run the daemon in the foreground until it stops.
#[allow(clippy::print_stdout)]
pub async fn run_start(paths: &WorkspacePaths, args: &StartArgs) -> Result<()> {
    let options = args.run_options();
    let mut config = load_config(paths)?;
    options.apply(&mut config);

    let filter = shuttle_core::tracing_init::daemon_filter("info", config.debug_mode);
    shuttle_core::tracing_init::init_tracing(&filter, args.log_json);

    info!(
        workspace = %paths.workspace().display(),
        max_workers = config.worker_capacity(),
        force = config.force_mode,
        "Starting shuttle"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let listener = spawn_signal_listener(shutdown_tx)?;
    let state = shuttle_daemon::run_daemon(config, paths, options.resume, shutdown_rx, || {})
        .await
        .context("Daemon failed to start")?;
    listener.abort();

    println!(
        "Shuttle stopped after {} iteration(s): {} worker(s) spawned, {} completed, {} failed",
        state.iteration_count,
        state.totals.workers_spawned,
        state.totals.workers_completed,
        state.totals.workers_failed
    );
    if state.active_workers() > 0 {
        println!(
            "{} worker(s) still running; they will finish on their own",
            state.active_workers()
        );
    }
    Ok(())
}

/// Outcome of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No live daemon owns the workspace.
    NotRunning,
    /// Stop signal raised; not waiting.
    Requested { pid: u32 },
    /// The daemon exited within the timeout.
    Stopped { pid: u32 },
}

/// Raise the stop signal and optionally wait for the daemon to exit.
pub async fn request_stop(signals: &SignalFiles, wait: Option<Duration>) -> Result<StopOutcome> {
    let Some(pid) = signals.read_pid().filter(|pid| is_process_alive(*pid)) else {
        return Ok(StopOutcome::NotRunning);
    };

    signals
        .raise_stop(unix_timestamp())
        .with_context(|| format!("Failed to write {}", signals.stop_path().display()))?;

    let Some(timeout) = wait else {
        return Ok(StopOutcome::Requested { pid });
    };

    let deadline = tokio::time::Instant::now() + timeout;
    while signals.read_pid() == Some(pid) && is_process_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            bail!(
                "Daemon (pid {pid}) did not stop within {}s; it may still be draining workers",
                timeout.as_secs()
            );
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
    Ok(StopOutcome::Stopped { pid })
}

/// Execute `shuttle stop`.
#[allow(clippy::print_stdout)]
pub async fn run_stop(paths: &WorkspacePaths, args: &StopArgs) -> Result<()> {
    let signals = SignalFiles::for_workspace(paths);
    let wait = args.wait.then(|| Duration::from_secs(args.timeout));
    match request_stop(&signals, wait).await? {
        StopOutcome::NotRunning => println!("Shuttle is not running"),
        StopOutcome::Requested { pid } => {
            println!("Stop requested (pid {pid}); workers will drain before exit");
        }
        StopOutcome::Stopped { pid } => println!("Shuttle stopped (pid {pid})"),
    }
    Ok(())
}
