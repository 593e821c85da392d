//! Decision engine.
//!
//! [`decide`] maps the current state, configuration and backlog snapshot to
//! the actions one iteration should take. It performs no I/O and reads no
//! clock, so identical inputs always produce identical decisions. Rules are
//! evaluated in a fixed order: workers, then proposal generators, then
//! support roles.

use std::fmt;

use shuttle_core::config::Config;
use shuttle_core::state::{DaemonState, ProposalKind, RoleName};

use crate::backlog::BacklogSnapshot;

/// One action requested by the decision engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Start a worker on this backlog item.
    SpawnWorker(String),
    SpawnProposalGenerator(ProposalKind),
    /// Start the role, or replace an idle instance.
    SpawnOrRefreshRole(RoleName),
    NoOp,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpawnWorker(target) => write!(f, "spawn worker for #{target}"),
            Self::SpawnProposalGenerator(kind) => write!(f, "trigger {kind} generator"),
            Self::SpawnOrRefreshRole(name) => write!(f, "spawn or refresh {name}"),
            Self::NoOp => f.write_str("no-op"),
        }
    }
}

/// Decide what to spawn this iteration.
///
/// Returns `[NoOp]` when no rule fires.
pub fn decide(
    state: &DaemonState,
    config: &Config,
    snapshot: &BacklogSnapshot,
    now: u64,
) -> Vec<Decision> {
    let mut decisions: Vec<Decision> = worker_targets(state, config, snapshot)
        .into_iter()
        .map(Decision::SpawnWorker)
        .collect();

    decisions.extend(
        config
            .enabled_proposal_kinds()
            .into_iter()
            .filter(|kind| proposal_blocker(state, config, snapshot, *kind, now).is_none())
            .map(Decision::SpawnProposalGenerator),
    );

    decisions.extend(
        config
            .enabled_roles()
            .into_iter()
            .filter(|name| role_blocker(state, config, *name, now).is_none())
            .map(Decision::SpawnOrRefreshRole),
    );

    if decisions.is_empty() {
        decisions.push(Decision::NoOp);
    }
    decisions
}

/// Why each rule that did not fire stayed quiet, one line per rule.
pub fn explain(
    state: &DaemonState,
    config: &Config,
    snapshot: &BacklogSnapshot,
    now: u64,
) -> Vec<String> {
    let mut reasons = Vec::new();

    let free = config.worker_capacity().saturating_sub(state.active_workers());
    if worker_targets(state, config, snapshot).is_empty() {
        let reason = if snapshot.ready.is_empty() {
            "no ready items".to_string()
        } else if free == 0 {
            format!(
                "pool full ({}/{})",
                state.active_workers(),
                config.worker_capacity()
            )
        } else {
            "every ready item already has a worker".to_string()
        };
        reasons.push(format!("workers: {reason}"));
    }

    for kind in ProposalKind::ALL {
        let reason = if config.proposal(kind).enabled {
            proposal_blocker(state, config, snapshot, kind, now)
        } else {
            Some("disabled".to_string())
        };
        if let Some(reason) = reason {
            reasons.push(format!("proposals[{kind}]: {reason}"));
        }
    }

    for name in RoleName::ALL {
        let reason = if config.role(name).enabled {
            role_blocker(state, config, name, now)
        } else {
            Some("disabled".to_string())
        };
        if let Some(reason) = reason {
            reasons.push(format!("role[{name}]: {reason}"));
        }
    }

    reasons
}

/// Ready items to start workers on, oldest first, limited by free slots.
fn worker_targets(state: &DaemonState, config: &Config, snapshot: &BacklogSnapshot) -> Vec<String> {
    let free = config.worker_capacity().saturating_sub(state.active_workers());
    let mut targets: Vec<String> = Vec::new();
    for item in snapshot.ordered_ready() {
        if targets.len() >= free {
            break;
        }
        if state.has_active_worker_for(&item.id) || targets.contains(&item.id) {
            continue;
        }
        targets.push(item.id.clone());
    }
    targets
}

fn proposal_blocker(
    state: &DaemonState,
    config: &Config,
    snapshot: &BacklogSnapshot,
    kind: ProposalKind,
    now: u64,
) -> Option<String> {
    let settings = config.proposal(kind);
    let ready = snapshot.ready_count();
    if ready >= config.issue_threshold {
        return Some(format!(
            "ready {ready} >= threshold {}",
            config.issue_threshold
        ));
    }

    if let Some(&last) = state.pipeline.last_trigger_at.get(&kind) {
        let elapsed = now.saturating_sub(last);
        if elapsed <= settings.cooldown_secs {
            return Some(format!(
                "cooling down ({elapsed}s of {}s)",
                settings.cooldown_secs
            ));
        }
    }

    let open = snapshot.open_proposals(kind);
    if open >= settings.max_open {
        return Some(format!("{open} open >= max {}", settings.max_open));
    }
    None
}

fn role_blocker(state: &DaemonState, config: &Config, name: RoleName, now: u64) -> Option<String> {
    let Some(record) = state.support_roles.get(&name) else {
        return None;
    };
    if !record.running {
        return None;
    }

    let interval = config.role(name).interval_secs;
    let idle_since = record.idle_since.or(record.last_spawned_at).unwrap_or(0);
    let idle = now.saturating_sub(idle_since);
    if idle > interval {
        None
    } else {
        Some(format!("running, idle {idle}s <= {interval}s"))
    }
}
