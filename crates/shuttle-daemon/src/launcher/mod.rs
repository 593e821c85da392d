//! Spawn interface: launching jobs and polling their status.
//!
//! Every job the daemon starts (worker, proposal generator, support role)
//! goes through a [`Launcher`]. Background spawns return a [`JobHandle`] that
//! the caller polls on later iterations; there are no completion callbacks.
//!
//! - [`ProcessLauncher`]: runs jobs as local agent subprocesses.
//! - [`verify_spawn`]: the post-spawn check that rejects phantom jobs.

use std::fmt;
use std::future::Future;

use shuttle_core::state::{ProposalKind, RoleName};

pub mod process;
pub mod verify;

pub use process::{ProcessLauncher, is_process_alive};
pub use verify::{misuse_signature, verify_spawn};

/// How a worker should finish its pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Merge without waiting for review (force mode).
    AutoMerge,
    /// Stop at an open PR and wait for approval.
    RequirePrApproval,
}

/// What a spawned job does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    Worker { target_id: String, mode: WorkerMode },
    ProposalGenerator(ProposalKind),
    Role(RoleName),
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Worker { target_id, .. } => write!(f, "worker#{target_id}"),
            Self::ProposalGenerator(kind) => write!(f, "generator:{kind}"),
            Self::Role(name) => write!(f, "role:{name}"),
        }
    }
}

/// Handle to a background job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    /// Launcher-assigned identifier; empty means the launch produced nothing
    /// trackable.
    pub id: String,
    pub pid: Option<u32>,
}

/// Output captured from a job so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutput {
    pub exit_code: Option<i32>,
    /// Total number of output lines seen.
    pub lines: u64,
    /// Most recent lines, oldest first.
    pub tail: Vec<String>,
}

impl JobOutput {
    /// The last non-empty line, used as a one-line summary.
    pub fn summary(&self) -> Option<String> {
        self.tail
            .iter()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.trim().to_string())
    }
}

/// Result of polling a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Started but has produced nothing yet.
    Pending,
    Running(JobOutput),
    Completed(JobOutput),
    Failed(String),
}

impl JobStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}

/// What [`Launcher::spawn`] produced.
#[derive(Debug)]
pub enum SpawnOutcome {
    /// Background job; poll the handle for progress.
    Background(JobHandle),
    /// Foreground job that already ran to completion.
    Finished(JobOutput),
}

/// Errors from launching or verifying a job.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Failed to launch {job}: {reason}")]
    LaunchFailed { job: String, reason: String },

    #[error("Launch of {job} returned a handle without an id")]
    MissingId { job: String },

    #[error("Job {job} hit a tool-misuse error: {line}")]
    Misuse { job: String, line: String },

    #[error("Job {job} failed during startup: {reason}")]
    ExitedEarly { job: String, reason: String },
}

/// Abstraction over starting and observing asynchronous jobs.
pub trait Launcher {
    /// Start `job`. With `background = false` the call resolves only once the
    /// job has finished.
    fn spawn(
        &self,
        job: &JobKind,
        background: bool,
    ) -> impl Future<Output = Result<SpawnOutcome, SpawnError>> + Send;

    /// Current status of a background job.
    fn poll(&self, handle: &JobHandle) -> impl Future<Output = JobStatus> + Send;

    /// Stop tracking a job without signalling it.
    fn release(&self, handle: &JobHandle) -> impl Future<Output = ()> + Send;

    /// Ask a superseded job to exit (SIGTERM on unix) and stop tracking it.
    fn terminate(&self, handle: &JobHandle) -> impl Future<Output = ()> + Send;
}
