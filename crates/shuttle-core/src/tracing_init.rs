//! Shared tracing/logging initialization.
//!
//! Both the `shuttle` CLI and the `shuttle-daemon` binary set up
//! `tracing_subscriber` the same way: an env-filter plus optional JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"shuttle_daemon=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Build the default filter string for a crate at the requested verbosity.
///
/// Debug mode raises the daemon's own target to `debug` so decision
/// explanations are emitted, while everything else stays at `info`.
pub fn daemon_filter(log_level: &str, debug_mode: bool) -> String {
    let level = if debug_mode { "debug" } else { log_level };
    format!("shuttle_daemon={level},shuttle_core={level},shuttle={level}")
}
