//! `shuttle status`: report persisted state without entering the loop.

use std::fmt::Write as _;

use anyhow::Result;
use serde::Serialize;

use shuttle_core::paths::WorkspacePaths;
use shuttle_core::signals::SignalFiles;
use shuttle_core::state::{DaemonState, unix_timestamp};
use shuttle_core::store::StateStore;
use shuttle_daemon::launcher::is_process_alive;

use crate::format_duration;

/// Number of recent warnings shown in the text report.
const RECENT_WARNINGS: usize = 5;

/// Everything `shuttle status` knows about a workspace.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub workspace: String,
    pub pid: Option<u32>,
    pub alive: bool,
    pub stop_requested: bool,
    pub draining: bool,
    pub state: Option<DaemonState>,
    /// Why the state file could not be read, if it could not.
    pub state_error: Option<String>,
}

impl StatusReport {
    pub fn gather(paths: &WorkspacePaths) -> Self {
        let signals = SignalFiles::for_workspace(paths);
        let store = StateStore::for_workspace(paths);
        let pid = signals.read_pid();

        let (state, state_error) = if store.state_file().exists() {
            match store.load() {
                Ok(state) => (Some(state), None),
                Err(e) => (None, Some(e.to_string())),
            }
        } else {
            (None, None)
        };

        Self {
            workspace: paths.workspace().display().to_string(),
            pid,
            alive: pid.is_some_and(is_process_alive),
            stop_requested: signals.stop_requested(),
            draining: signals.drain_raised(),
            state,
            state_error,
        }
    }

    /// Human-readable multi-line report as of `now`.
    pub fn render(&self, now: u64) -> String {
        let mut out = String::new();
        match (self.pid, self.alive) {
            (Some(pid), true) => {
                let _ = writeln!(out, "Shuttle: running (pid {pid})");
            }
            (Some(pid), false) => {
                let _ = writeln!(out, "Shuttle: not running (stale pid file for {pid})");
            }
            (None, _) => {
                let _ = writeln!(out, "Shuttle: not running");
            }
        }
        let _ = writeln!(out, "Workspace: {}", self.workspace);

        if self.stop_requested || self.draining {
            let mut pending = Vec::new();
            if self.stop_requested {
                pending.push("stop requested");
            }
            if self.draining {
                pending.push("workers draining");
            }
            let _ = writeln!(out, "Signals: {}", pending.join(", "));
        }

        if let Some(error) = &self.state_error {
            let _ = writeln!(out, "State: unreadable ({error})");
            return out;
        }
        let Some(state) = &self.state else {
            let _ = writeln!(out, "State: none recorded");
            return out;
        };

        if state.running {
            let _ = writeln!(
                out,
                "Uptime: {}",
                format_duration(now.saturating_sub(state.started_at))
            );
        } else if let Some(stopped) = state.stopped_at {
            let _ = writeln!(
                out,
                "Stopped: {} ago",
                format_duration(now.saturating_sub(stopped))
            );
        }
        let last_poll = state.last_poll_at.map_or_else(
            || "never".to_string(),
            |at| format!("{} ago", format_duration(now.saturating_sub(at))),
        );
        let _ = writeln!(
            out,
            "Iterations: {} (last poll {last_poll})",
            state.iteration_count
        );

        let mut modes = Vec::new();
        if state.force_mode {
            modes.push("force");
        }
        if state.debug_mode {
            modes.push("debug");
        }
        if !modes.is_empty() {
            let _ = writeln!(out, "Modes: {}", modes.join(", "));
        }

        let pipeline = &state.pipeline;
        let proposals = pipeline
            .open_proposals
            .iter()
            .map(|(kind, n)| format!("{kind}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(
            out,
            "Backlog: ready={} building={} blocked={} proposals: {}",
            pipeline.ready_count,
            pipeline.building_count,
            pipeline.blocked_count,
            if proposals.is_empty() { "-" } else { proposals.as_str() }
        );

        let _ = writeln!(out, "Workers: {} active", state.active_workers());
        for worker in state.workers.values() {
            let _ = write!(
                out,
                "  #{} {:?} for {}",
                worker.target_id,
                worker.status,
                format_duration(now.saturating_sub(worker.spawned_at))
            );
            if let Some(summary) = &worker.last_output_summary {
                let _ = write!(out, ": {summary}");
            }
            out.push('\n');
        }

        if !state.support_roles.is_empty() {
            let _ = writeln!(out, "Roles:");
            for role in state.support_roles.values() {
                let activity = if role.running {
                    role.idle_since.map_or_else(
                        || "running".to_string(),
                        |at| format!("running, idle {}", format_duration(now.saturating_sub(at))),
                    )
                } else {
                    "stopped".to_string()
                };
                let _ = writeln!(out, "  {:<9} {activity}", role.name.as_str());
            }
        }

        let totals = &state.totals;
        let _ = writeln!(
            out,
            "Totals: spawned={} completed={} failed={} proposals={} roles={} spawn_failures={}",
            totals.workers_spawned,
            totals.workers_completed,
            totals.workers_failed,
            totals.proposals_triggered,
            totals.roles_spawned,
            totals.spawn_failures
        );

        if !state.warnings.is_empty() {
            let _ = writeln!(out, "Recent warnings:");
            let skip = state.warnings.len().saturating_sub(RECENT_WARNINGS);
            for warning in &state.warnings[skip..] {
                let _ = writeln!(
                    out,
                    "  [{:?}] {} ({} ago)",
                    warning.kind,
                    warning.message,
                    format_duration(now.saturating_sub(warning.at))
                );
            }
        }
        out
    }
}

/// Execute `shuttle status`.
#[allow(clippy::print_stdout)]
pub fn run(paths: &WorkspacePaths, json: bool) -> Result<()> {
    let report = StatusReport::gather(paths);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render(unix_timestamp()));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use shuttle_core::state::{RoleName, RoleRecord, Warning, WarningKind, WorkerRecord};

    #[test]
    fn empty_workspace_reports_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let report = StatusReport::gather(&WorkspacePaths::new(dir.path()));

        assert!(!report.alive);
        assert!(report.state.is_none());
        let text = report.render(0);
        assert!(text.contains("Shuttle: not running"));
        assert!(text.contains("State: none recorded"));
    }

    #[test]
    fn report_shows_workers_roles_and_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path());

        let mut state = DaemonState::new(1_000);
        state.running = true;
        state.iteration_count = 7;
        state.last_poll_at = Some(1_090);
        let mut worker = WorkerRecord::running("w1".into(), "42".into(), 1_000, None);
        worker.last_output_summary = Some("opened PR #50".into());
        state.workers.insert("w1".into(), worker);
        state.support_roles.insert(
            RoleName::Judge,
            RoleRecord {
                running: true,
                idle_since: Some(1_040),
                ..RoleRecord::new(RoleName::Judge)
            },
        );
        state.push_warning(Warning::new(1_050, WarningKind::SpawnFailed, "unknown option"));
        StateStore::for_workspace(&paths).save(&state).unwrap();
        SignalFiles::for_workspace(&paths).raise_stop(1_095).unwrap();

        let report = StatusReport::gather(&paths);
        let text = report.render(1_100);

        assert!(report.stop_requested);
        assert!(text.contains("Signals: stop requested"));
        assert!(text.contains("Uptime: 1m 40s"));
        assert!(text.contains("Iterations: 7 (last poll 10s ago)"));
        assert!(text.contains("#42 Running for 1m 40s: opened PR #50"));
        assert!(text.contains("judge     running, idle 1m 0s"));
        assert!(text.contains("[SpawnFailed] unknown option"));
    }

    #[test]
    fn corrupt_state_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path());
        std::fs::create_dir_all(paths.shuttle_dir()).unwrap();
        std::fs::write(paths.state_file(), "{ not json").unwrap();

        let report = StatusReport::gather(&paths);
        assert!(report.state_error.is_some());
        assert!(report.render(0).contains("State: unreadable"));

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["state"].is_null());
    }
}
