//! `Shuttle` Daemon
//!
//! Keeps a bounded pool of agent workers busy against the issue backlog of a
//! workspace until it is asked to stop.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use shuttle_core::config::load_config;
use shuttle_core::paths::WorkspacePaths;
use shuttle_daemon::RunOptions;
use shuttle_daemon::orchestration::spawn_signal_listener;

#[derive(Parser, Debug)]
#[command(name = "shuttle-daemon")]
#[command(version, about = "Shuttle daemon - autonomous issue orchestration")]
struct Args {
    /// Workspace (repository checkout) to orchestrate
    #[arg(long, default_value = ".", env = "SHUTTLE_WORKSPACE")]
    workspace: PathBuf,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "SHUTTLE_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "SHUTTLE_LOG_JSON")]
    log_json: bool,

    /// Let workers merge without review and the champion auto-promote.
    #[arg(long)]
    force: bool,

    /// Log why each decision rule did not fire.
    #[arg(long, env = "SHUTTLE_DEBUG")]
    debug: bool,

    /// Refuse to start when the configuration has validation issues.
    #[arg(long, env = "SHUTTLE_STRICT")]
    strict: bool,

    /// Continue from the previous state file instead of archiving it.
    #[arg(long)]
    resume: bool,

    /// Maximum concurrent workers (overrides config and environment)
    #[arg(long)]
    max_workers: Option<usize>,

    /// Seconds between iterations (overrides config and environment)
    #[arg(long)]
    poll_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let paths = WorkspacePaths::new(&args.workspace);
    let mut config = load_config(&paths)?;
    let options = RunOptions {
        force: args.force,
        debug: args.debug,
        strict: args.strict,
        resume: args.resume,
        max_workers: args.max_workers,
        poll_interval_secs: args.poll_interval,
    };
    options.apply(&mut config);

    let log_filter = shuttle_core::tracing_init::daemon_filter(&args.log_level, config.debug_mode);
    shuttle_core::tracing_init::init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        workspace = %paths.workspace().display(),
        max_workers = config.worker_capacity(),
        poll_interval_secs = config.poll_interval_secs,
        "Starting shuttle-daemon"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let signal_handle = spawn_signal_listener(shutdown_tx)?;

    let state = shuttle_daemon::run_daemon(config, &paths, options.resume, shutdown_rx, || {
        // Unset $NOTIFY_SOCKET so spawned jobs don't notify systemd.
        #[cfg(unix)]
        if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
            tracing::warn!(error = %e, "Failed to notify systemd");
        }
    })
    .await
    .context("Daemon failed to start")?;

    signal_handle.abort();
    info!(
        iterations = state.iteration_count,
        warnings = state.warnings.len(),
        "Daemon exited"
    );
    Ok(())
}
