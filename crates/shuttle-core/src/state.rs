//! Daemon state model.
//!
//! [`DaemonState`] is the single value the control loop owns for the whole
//! run. It is threaded through every component call by reference and is
//! persisted (as JSON) by the [`StateStore`](crate::store::StateStore) after
//! each iteration, which is how a restarted daemon picks up where it left off.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Maximum number of warnings retained in the state file (oldest dropped first).
pub const MAX_WARNINGS: usize = 100;

/// Identifier of a spawned worker job.
pub type WorkerId = String;

/// Returns the current time as a Unix timestamp (seconds since epoch).
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Long-lived support roles, respawned on an idle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleName {
    /// Backlog triage and prioritisation.
    Guide,
    /// Promotes proposals into ready backlog items.
    Champion,
    /// Repairs pull requests that failed review or checks.
    Doctor,
    /// Audits the main branch build.
    Auditor,
    /// Reviews pull requests opened by workers.
    Judge,
}

impl RoleName {
    /// Every role, in the order the decision engine evaluates them.
    pub const ALL: [Self; 5] = [
        Self::Guide,
        Self::Champion,
        Self::Doctor,
        Self::Auditor,
        Self::Judge,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Guide => "guide",
            Self::Champion => "champion",
            Self::Doctor => "doctor",
            Self::Auditor => "auditor",
            Self::Judge => "judge",
        }
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of proposal generator that replenish the backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalKind {
    /// Proposes new features and improvements.
    Architect,
    /// Proposes simplifications and removals.
    Hermit,
}

impl ProposalKind {
    pub const ALL: [Self; 2] = [Self::Architect, Self::Hermit];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Architect => "architect",
            Self::Hermit => "hermit",
        }
    }
}

impl fmt::Display for ProposalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a worker record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkerStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One in-flight unit-of-work execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    /// Backlog item this worker serves.
    pub target_id: String,
    pub spawned_at: u64,
    pub status: WorkerStatus,
    #[serde(default)]
    pub last_output_summary: Option<String>,
    /// OS process id, used to reconcile workers left behind by a previous run.
    #[serde(default)]
    pub pid: Option<u32>,
    /// Set once a stuck-worker warning has been raised for this record.
    #[serde(default)]
    pub stuck_warned: bool,
}

impl WorkerRecord {
    pub fn running(id: WorkerId, target_id: String, spawned_at: u64, pid: Option<u32>) -> Self {
        Self {
            id,
            target_id,
            spawned_at,
            status: WorkerStatus::Running,
            last_output_summary: None,
            pid,
            stuck_warned: false,
        }
    }
}

/// One long-lived support role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub name: RoleName,
    #[serde(default)]
    pub last_spawned_at: Option<u64>,
    /// Last time the role showed activity (spawn or new output).
    #[serde(default)]
    pub idle_since: Option<u64>,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub last_output_summary: Option<String>,
}

impl RoleRecord {
    pub const fn new(name: RoleName) -> Self {
        Self {
            name,
            last_spawned_at: None,
            idle_since: None,
            running: false,
            job_id: None,
            pid: None,
            last_output_summary: None,
        }
    }
}

/// Snapshot of backlog counts plus per-kind trigger history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineCounters {
    pub ready_count: u32,
    pub building_count: u32,
    pub blocked_count: u32,
    pub open_proposals: BTreeMap<ProposalKind, u32>,
    pub last_trigger_at: BTreeMap<ProposalKind, u64>,
}

/// Lifetime counters for the current run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Totals {
    pub workers_spawned: u64,
    pub workers_completed: u64,
    pub workers_failed: u64,
    pub proposals_triggered: u64,
    pub roles_spawned: u64,
    pub spawn_failures: u64,
    /// Warnings recorded so far, including ones since dropped from the list.
    pub warnings_raised: u64,
}

/// Category of a recorded warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    CorruptState,
    BacklogUnreachable,
    SpawnFailed,
    PersistFailed,
    StuckWorker,
    ConfigValidation,
    DrainTimeout,
}

/// A non-fatal problem observed during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub at: u64,
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(at: u64, kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            at,
            kind,
            message: message.into(),
        }
    }
}

/// Process-wide daemon state, persisted after every iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonState {
    pub running: bool,
    pub started_at: u64,
    pub stopped_at: Option<u64>,
    pub last_poll_at: Option<u64>,
    pub iteration_count: u64,
    pub force_mode: bool,
    pub debug_mode: bool,
    pub workers: BTreeMap<WorkerId, WorkerRecord>,
    pub support_roles: BTreeMap<RoleName, RoleRecord>,
    pub pipeline: PipelineCounters,
    pub totals: Totals,
    pub warnings: Vec<Warning>,
}

impl DaemonState {
    /// Fresh state for a run starting at `now`.
    pub fn new(now: u64) -> Self {
        Self {
            started_at: now,
            ..Self::default()
        }
    }

    /// Number of workers that still occupy a slot.
    pub fn active_workers(&self) -> usize {
        self.workers
            .values()
            .filter(|w| !w.status.is_terminal())
            .count()
    }

    /// Whether `target_id` already has a non-terminal worker.
    pub fn has_active_worker_for(&self, target_id: &str) -> bool {
        self.workers
            .values()
            .any(|w| !w.status.is_terminal() && w.target_id == target_id)
    }

    /// Record for `name`, inserting an idle one if absent.
    pub fn role_mut(&mut self, name: RoleName) -> &mut RoleRecord {
        self.support_roles
            .entry(name)
            .or_insert_with(|| RoleRecord::new(name))
    }

    /// Append a warning, dropping the oldest beyond [`MAX_WARNINGS`].
    pub fn push_warning(&mut self, warning: Warning) {
        self.totals.warnings_raised += 1;
        self.warnings.push(warning);
        if self.warnings.len() > MAX_WARNINGS {
            let excess = self.warnings.len() - MAX_WARNINGS;
            self.warnings.drain(..excess);
        }
    }
}
