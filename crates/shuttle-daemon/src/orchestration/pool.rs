//! Bounded worker pool.
//!
//! The [`WorkerPool`] limits how many workers occupy a slot at once. Slots are
//! not a separate resource: they are derived from the non-terminal records in
//! [`DaemonState::workers`], which is the only place worker bookkeeping lives.
//! A [`SlotPermit`] holds the state mutably until it is consumed by
//! [`SlotPermit::register`], so a second slot cannot be handed out between
//! acquiring a slot and filling it.

use std::fmt;

use tracing::{debug, info, warn};

use shuttle_core::config::{Config, DEFAULT_MAX_WORKERS};
use shuttle_core::state::{
    DaemonState, Warning, WarningKind, WorkerId, WorkerRecord, WorkerStatus,
};

use crate::launcher::{JobHandle, JobStatus, Launcher};

/// Default age after which a running worker is reported as stuck.
const DEFAULT_STUCK_AFTER_SECS: u64 = 2 * 60 * 60;

/// The right to add one worker to the state.
///
/// Dropping the permit without registering returns the slot.
pub struct SlotPermit<'a> {
    state: &'a mut DaemonState,
}

impl SlotPermit<'_> {
    /// Fill the slot with `record`.
    ///
    /// Fails if the record's backlog item already has an active worker.
    pub fn register(self, record: WorkerRecord) -> Result<(), PoolError> {
        if self.state.has_active_worker_for(&record.target_id) {
            return Err(PoolError::DuplicateTarget {
                target_id: record.target_id,
            });
        }
        debug!(worker_id = %record.id, target = %record.target_id, "Registering worker");
        self.state.workers.insert(record.id.clone(), record);
        Ok(())
    }
}

/// A worker that reached a terminal state during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOutcome {
    pub worker_id: WorkerId,
    pub target_id: String,
    pub status: WorkerStatus,
    pub summary: Option<String>,
    pub runtime_secs: u64,
}

impl fmt::Display for WorkerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.status {
            WorkerStatus::Failed => "failed",
            _ => "completed",
        };
        write!(
            f,
            "worker {} for #{} {verb} after {}s",
            self.worker_id, self.target_id, self.runtime_secs
        )?;
        if let Some(summary) = &self.summary {
            write!(f, ": {summary}")?;
        }
        Ok(())
    }
}

/// Capacity accounting and reconciliation for worker jobs.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    capacity: usize,
    stuck_after_secs: u64,
}

impl WorkerPool {
    /// Create a pool; a capacity of zero uses the default.
    pub fn new(max_workers: usize) -> Self {
        let capacity = if max_workers == 0 {
            DEFAULT_MAX_WORKERS
        } else {
            max_workers
        };

        info!(max_workers = capacity, "Worker pool created");

        Self {
            capacity,
            stuck_after_secs: DEFAULT_STUCK_AFTER_SECS,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_workers).with_stuck_after(config.worker_stuck_after_secs)
    }

    #[must_use]
    pub const fn with_stuck_after(mut self, secs: u64) -> Self {
        self.stuck_after_secs = secs;
        self
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots still free in `state`.
    pub fn available_slots(&self, state: &DaemonState) -> usize {
        self.capacity.saturating_sub(state.active_workers())
    }

    /// Reserve a slot, or `None` if the pool is full.
    pub fn try_acquire_slot<'a>(&self, state: &'a mut DaemonState) -> Option<SlotPermit<'a>> {
        if self.available_slots(state) == 0 {
            return None;
        }
        Some(SlotPermit { state })
    }

    /// Poll every active worker and retire the ones that finished.
    ///
    /// Finished workers are removed from `state`, counted in its totals and
    /// released from the launcher. Workers running longer than the stuck
    /// threshold get one `StuckWorker` warning each; they are never killed.
    pub async fn reconcile<L: Launcher>(
        &self,
        state: &mut DaemonState,
        launcher: &L,
        now: u64,
    ) -> Vec<WorkerOutcome> {
        let ids: Vec<WorkerId> = state.workers.keys().cloned().collect();
        let mut outcomes = Vec::new();

        for id in ids {
            let Some(record) = state.workers.get(&id) else {
                continue;
            };
            let handle = JobHandle {
                id: record.id.clone(),
                pid: record.pid,
            };

            let status = if record.status.is_terminal() {
                None
            } else {
                Some(launcher.poll(&handle).await)
            };

            let Some(record) = state.workers.get_mut(&id) else {
                continue;
            };
            match status {
                None => {}
                Some(JobStatus::Pending) => continue,
                Some(JobStatus::Running(output)) => {
                    record.status = WorkerStatus::Running;
                    if let Some(summary) = output.summary() {
                        record.last_output_summary = Some(summary);
                    }
                    self.check_stuck(state, &id, now);
                    continue;
                }
                Some(JobStatus::Completed(output)) => {
                    record.status = WorkerStatus::Completed;
                    if let Some(summary) = output.summary() {
                        record.last_output_summary = Some(summary);
                    }
                }
                Some(JobStatus::Failed(reason)) => {
                    record.status = WorkerStatus::Failed;
                    record.last_output_summary = Some(reason);
                }
            }

            let Some(record) = state.workers.remove(&id) else {
                continue;
            };
            launcher.release(&handle).await;
            if record.status == WorkerStatus::Failed {
                state.totals.workers_failed += 1;
            } else {
                state.totals.workers_completed += 1;
            }

            let outcome = WorkerOutcome {
                runtime_secs: now.saturating_sub(record.spawned_at),
                worker_id: record.id,
                target_id: record.target_id,
                status: record.status,
                summary: record.last_output_summary,
            };
            info!(
                worker_id = %outcome.worker_id,
                target = %outcome.target_id,
                status = ?outcome.status,
                runtime_secs = outcome.runtime_secs,
                "Worker finished"
            );
            outcomes.push(outcome);
        }

        outcomes
    }

    fn check_stuck(&self, state: &mut DaemonState, id: &str, now: u64) {
        let Some(record) = state.workers.get_mut(id) else {
            return;
        };
        let age = now.saturating_sub(record.spawned_at);
        if record.stuck_warned || age <= self.stuck_after_secs {
            return;
        }
        record.stuck_warned = true;
        let message = format!(
            "worker {} for #{} has been running for {age}s",
            record.id, record.target_id
        );
        warn!(worker_id = %record.id, target = %record.target_id, age_secs = age, "Worker appears stuck");
        state.push_warning(Warning::new(now, WarningKind::StuckWorker, message));
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

/// Errors from the worker pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A worker for this backlog item is already active.
    #[error("Backlog item #{target_id} already has an active worker")]
    DuplicateTarget { target_id: String },
}
