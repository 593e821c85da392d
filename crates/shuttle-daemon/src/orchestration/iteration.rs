//! One orchestration cycle.
//!
//! [`Orchestrator::run_iteration`] pulls a backlog snapshot, reconciles
//! workers and support roles, asks the decision engine what to do, applies
//! each decision through the launcher and persists the result. Every failure
//! inside an iteration is turned into a warning on the state; the caller
//! always gets back exactly one [`IterationSummary`].

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, info, warn};

use shuttle_core::config::Config;
use shuttle_core::signals::SignalFiles;
use shuttle_core::state::{
    DaemonState, ProposalKind, RoleName, Warning, WarningKind, WorkerRecord, WorkerStatus,
};
use shuttle_core::store::StateStore;

use super::decision::{Decision, decide, explain};
use super::pool::{WorkerOutcome, WorkerPool};
use crate::backlog::{Backlog, BacklogSnapshot};
use crate::launcher::{
    JobHandle, JobKind, JobStatus, Launcher, SpawnError, SpawnOutcome, WorkerMode, verify_spawn,
};

/// Fixed-shape result of one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationSummary {
    pub iteration: u64,
    pub ready: u32,
    pub building: u32,
    pub blocked: u32,
    pub active_workers: usize,
    pub max_workers: usize,
    pub spawned: u32,
    pub completed: u32,
    pub failed: u32,
    pub proposals: u32,
    pub roles: u32,
    /// Warnings raised during this iteration.
    pub warnings: u64,
    /// A stop request was seen at the end of the iteration.
    pub shutdown: bool,
}

impl fmt::Display for IterationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iter={} ready={} building={} blocked={} workers={}/{} +spawned={} completed={} failed={} proposals={} roles={} warnings={}",
            self.iteration,
            self.ready,
            self.building,
            self.blocked,
            self.active_workers,
            self.max_workers,
            self.spawned,
            self.completed,
            self.failed,
            self.proposals,
            self.roles,
            self.warnings,
        )?;
        if self.shutdown {
            f.write_str(" shutdown")?;
        }
        Ok(())
    }
}

/// Runs iterations against one launcher and one backlog.
pub struct Orchestrator<L, B> {
    config: Config,
    launcher: L,
    backlog: B,
    store: StateStore,
    signals: SignalFiles,
    pool: WorkerPool,
    /// Output line count last seen per role, for idle tracking.
    role_lines: HashMap<RoleName, u64>,
}

impl<L: Launcher + Sync, B: Backlog + Sync> Orchestrator<L, B> {
    pub fn new(
        config: Config,
        launcher: L,
        backlog: B,
        store: StateStore,
        signals: SignalFiles,
    ) -> Self {
        let pool = WorkerPool::from_config(&config);
        Self {
            config,
            launcher,
            backlog,
            store,
            signals,
            pool,
            role_lines: HashMap::new(),
        }
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn launcher(&self) -> &L {
        &self.launcher
    }

    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    pub const fn signals(&self) -> &SignalFiles {
        &self.signals
    }

    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run one full cycle at time `now`.
    pub async fn run_iteration(&mut self, state: &mut DaemonState, now: u64) -> IterationSummary {
        let warnings_before = state.totals.warnings_raised;
        state.iteration_count += 1;
        state.last_poll_at = Some(now);

        let mut summary = IterationSummary {
            iteration: state.iteration_count,
            max_workers: self.pool.capacity(),
            ..IterationSummary::default()
        };

        let kinds = self.config.enabled_proposal_kinds();
        let snapshot = match self.backlog.snapshot(&kinds).await {
            Ok(snapshot) => {
                record_pipeline(state, &snapshot);
                Some(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "Backlog unavailable, skipping decisions this cycle");
                state.push_warning(Warning::new(now, WarningKind::BacklogUnreachable, e.to_string()));
                None
            }
        };

        for outcome in self.pool.reconcile(state, &self.launcher, now).await {
            tally_outcome(&mut summary, &outcome);
        }
        self.reconcile_roles(state, now).await;

        if let Some(snapshot) = &snapshot {
            summary.ready = snapshot.ready_count();
            summary.building = snapshot.building;
            summary.blocked = snapshot.blocked;

            let decisions = decide(state, &self.config, snapshot, now);
            if self.config.debug_mode {
                for reason in explain(state, &self.config, snapshot, now) {
                    debug!(reason = %reason, "Rule did not fire");
                }
            }
            for decision in decisions {
                self.apply(state, &decision, now, &mut summary).await;
            }
        }

        if let Err(e) = self.store.save(state) {
            warn!(error = %e, "Failed to persist daemon state");
            state.push_warning(Warning::new(now, WarningKind::PersistFailed, e.to_string()));
        }

        summary.active_workers = state.active_workers();
        summary.warnings = state.totals.warnings_raised - warnings_before;
        summary.shutdown = self.signals.stop_requested();
        summary
    }

    async fn apply(
        &mut self,
        state: &mut DaemonState,
        decision: &Decision,
        now: u64,
        summary: &mut IterationSummary,
    ) {
        debug!(decision = %decision, "Applying decision");
        match decision {
            Decision::SpawnWorker(target) => {
                if self.spawn_worker(state, target, now).await {
                    summary.spawned += 1;
                }
            }
            Decision::SpawnProposalGenerator(kind) => {
                if self.trigger_generator(state, *kind, now).await {
                    summary.proposals += 1;
                }
            }
            Decision::SpawnOrRefreshRole(name) => {
                if self.spawn_role(state, *name, now).await {
                    summary.roles += 1;
                }
            }
            Decision::NoOp => {}
        }
    }

    async fn spawn_worker(&self, state: &mut DaemonState, target: &str, now: u64) -> bool {
        let mode = if self.config.force_mode {
            WorkerMode::AutoMerge
        } else {
            WorkerMode::RequirePrApproval
        };
        let job = JobKind::Worker {
            target_id: target.to_string(),
            mode,
        };

        let Some(permit) = self.pool.try_acquire_slot(state) else {
            debug!(target, "Pool full, worker not spawned");
            return false;
        };
        let (handle, status) = match self.spawn_verified(&job).await {
            Ok(spawned) => spawned,
            Err(e) => {
                drop(permit);
                record_spawn_failure(state, now, &e);
                return false;
            }
        };

        let mut record = WorkerRecord::running(handle.id.clone(), target.to_string(), now, handle.pid);
        record.last_output_summary = status_summary(&status);
        if let Err(e) = permit.register(record) {
            warn!(error = %e, worker_id = %handle.id, "Worker not registered");
            self.launcher.release(&handle).await;
            return false;
        }

        state.totals.workers_spawned += 1;
        info!(target, worker_id = %handle.id, pid = ?handle.pid, "Worker spawned");
        true
    }

    async fn trigger_generator(&self, state: &mut DaemonState, kind: ProposalKind, now: u64) -> bool {
        let job = JobKind::ProposalGenerator(kind);
        match self.spawn_verified(&job).await {
            Ok((handle, _)) => {
                // Generators are fire-and-forget: their effect shows up as
                // open proposals in later snapshots.
                self.launcher.release(&handle).await;
                state.pipeline.last_trigger_at.insert(kind, now);
                state.totals.proposals_triggered += 1;
                info!(kind = %kind, job_id = %handle.id, "Proposal generator triggered");
                true
            }
            Err(e) => {
                record_spawn_failure(state, now, &e);
                false
            }
        }
    }

    async fn spawn_role(&mut self, state: &mut DaemonState, name: RoleName, now: u64) -> bool {
        let previous = state.support_roles.get(&name).and_then(|record| {
            record.job_id.clone().map(|id| JobHandle {
                id,
                pid: record.pid,
            })
        });

        // At most one live instance per role: the idle one goes first.
        if let Some(old) = previous {
            info!(role = %name, job_id = %old.id, pid = ?old.pid, "Stopping idle role instance");
            self.launcher.terminate(&old).await;
            let record = state.role_mut(name);
            record.running = false;
            record.job_id = None;
            record.pid = None;
            self.role_lines.remove(&name);
        }

        let job = JobKind::Role(name);
        let (handle, status) = match self.spawn_verified(&job).await {
            Ok(spawned) => spawned,
            Err(e) => {
                record_spawn_failure(state, now, &e);
                return false;
            }
        };

        let lines = match &status {
            JobStatus::Running(output) | JobStatus::Completed(output) => output.lines,
            _ => 0,
        };
        self.role_lines.insert(name, lines);

        let record = state.role_mut(name);
        record.running = true;
        record.last_spawned_at = Some(now);
        record.idle_since = Some(now);
        record.job_id = Some(handle.id.clone());
        record.pid = handle.pid;
        record.last_output_summary = status_summary(&status);
        state.totals.roles_spawned += 1;
        info!(role = %name, job_id = %handle.id, pid = ?handle.pid, "Support role spawned");
        true
    }

    /// Spawn `job` in the background and verify it.
    async fn spawn_verified(&self, job: &JobKind) -> Result<(JobHandle, JobStatus), SpawnError> {
        let handle = match self.launcher.spawn(job, true).await? {
            SpawnOutcome::Background(handle) => handle,
            SpawnOutcome::Finished(output) => {
                return Err(SpawnError::ExitedEarly {
                    job: job.to_string(),
                    reason: output
                        .summary()
                        .unwrap_or_else(|| "finished before it could be tracked".to_string()),
                });
            }
        };
        let status =
            verify_spawn(&self.launcher, job, &handle, self.config.spawn_verify_delay()).await?;
        Ok((handle, status))
    }

    /// Refresh idle tracking for running roles and retire the ones that exited.
    async fn reconcile_roles(&mut self, state: &mut DaemonState, now: u64) {
        let running: Vec<(RoleName, JobHandle)> = state
            .support_roles
            .values()
            .filter(|record| record.running)
            .filter_map(|record| {
                record.job_id.clone().map(|id| {
                    (
                        record.name,
                        JobHandle {
                            id,
                            pid: record.pid,
                        },
                    )
                })
            })
            .collect();

        for (name, handle) in running {
            let status = self.launcher.poll(&handle).await;
            let record = state.role_mut(name);
            match status {
                JobStatus::Pending => {}
                JobStatus::Running(output) => {
                    let seen = self.role_lines.entry(name).or_insert(0);
                    if output.lines > *seen {
                        *seen = output.lines;
                        record.idle_since = Some(now);
                    }
                    if let Some(summary) = output.summary() {
                        record.last_output_summary = Some(summary);
                    }
                }
                JobStatus::Completed(output) => {
                    if let Some(summary) = output.summary() {
                        record.last_output_summary = Some(summary);
                    }
                    record.running = false;
                    info!(role = %name, job_id = %handle.id, "Support role exited");
                }
                JobStatus::Failed(reason) => {
                    warn!(role = %name, job_id = %handle.id, reason = %reason, "Support role failed");
                    record.last_output_summary = Some(reason);
                    record.running = false;
                }
            }

            if !record.running {
                record.job_id = None;
                record.pid = None;
                self.role_lines.remove(&name);
                self.launcher.release(&handle).await;
            }
        }
    }
}

fn record_pipeline(state: &mut DaemonState, snapshot: &BacklogSnapshot) {
    state.pipeline.ready_count = snapshot.ready_count();
    state.pipeline.building_count = snapshot.building;
    state.pipeline.blocked_count = snapshot.blocked;
    state.pipeline.open_proposals = snapshot.proposals.clone();
}

fn record_spawn_failure(state: &mut DaemonState, now: u64, err: &SpawnError) {
    warn!(error = %err, "Spawn rejected");
    state.totals.spawn_failures += 1;
    state.push_warning(Warning::new(now, WarningKind::SpawnFailed, err.to_string()));
}

fn tally_outcome(summary: &mut IterationSummary, outcome: &WorkerOutcome) {
    if outcome.status == WorkerStatus::Failed {
        summary.failed += 1;
    } else {
        summary.completed += 1;
    }
}

fn status_summary(status: &JobStatus) -> Option<String> {
    match status {
        JobStatus::Running(output) | JobStatus::Completed(output) => output.summary(),
        JobStatus::Pending | JobStatus::Failed(_) => None,
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backlog::{BacklogError, BacklogItem};
    use crate::launcher::JobOutput;
    use shuttle_core::config::RoleConfig;
    use shuttle_core::paths::WorkspacePaths;
    use std::sync::Mutex;

    /// Launcher whose jobs run until told otherwise.
    #[derive(Default)]
    struct ScriptedLauncher {
        next_id: Mutex<u32>,
        spawned: Mutex<Vec<JobKind>>,
        /// Status returned for every poll, keyed by job id.
        statuses: Mutex<HashMap<String, JobStatus>>,
        /// Output reported by freshly spawned jobs.
        first_output: Mutex<Option<String>>,
        terminated: Mutex<Vec<String>>,
    }

    impl ScriptedLauncher {
        fn set(&self, id: &str, status: JobStatus) {
            self.statuses.lock().unwrap().insert(id.to_string(), status);
        }

        fn spawned(&self) -> Vec<JobKind> {
            self.spawned.lock().unwrap().clone()
        }

        fn terminated(&self) -> Vec<String> {
            self.terminated.lock().unwrap().clone()
        }
    }

    impl Launcher for ScriptedLauncher {
        async fn spawn(&self, job: &JobKind, _bg: bool) -> Result<SpawnOutcome, SpawnError> {
            let id = {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                format!("job-{next}")
            };
            self.spawned.lock().unwrap().push(job.clone());
            let status = match self.first_output.lock().unwrap().clone() {
                Some(line) => JobStatus::Running(JobOutput {
                    exit_code: None,
                    lines: 1,
                    tail: vec![line],
                }),
                None => JobStatus::Pending,
            };
            self.set(&id, status);
            Ok(SpawnOutcome::Background(JobHandle { id, pid: None }))
        }

        async fn poll(&self, handle: &JobHandle) -> JobStatus {
            self.statuses
                .lock()
                .unwrap()
                .get(&handle.id)
                .cloned()
                .unwrap_or(JobStatus::Pending)
        }

        async fn release(&self, _handle: &JobHandle) {}

        async fn terminate(&self, handle: &JobHandle) {
            self.terminated.lock().unwrap().push(handle.id.clone());
            self.set(&handle.id, JobStatus::Failed("terminated".into()));
        }
    }

    struct StaticBacklog(Result<BacklogSnapshot, String>);

    impl Backlog for StaticBacklog {
        async fn snapshot(&self, _kinds: &[ProposalKind]) -> Result<BacklogSnapshot, BacklogError> {
            self.0
                .clone()
                .map_err(|reason| BacklogError::Unreachable { reason })
        }
    }

    fn ready(ids: &[&str]) -> BacklogSnapshot {
        BacklogSnapshot {
            ready: ids
                .iter()
                .map(|id| BacklogItem::new(*id, "2024-01-01T00:00:00Z"))
                .collect(),
            ..BacklogSnapshot::default()
        }
    }

    fn workers_only_config() -> Config {
        let mut config = Config::default();
        config.spawn_verify_ms = 0;
        config.issue_threshold = 0;
        for name in RoleName::ALL {
            config.roles.insert(
                name,
                RoleConfig {
                    enabled: false,
                    ..RoleConfig::default()
                },
            );
        }
        config
    }

    fn orchestrator(
        dir: &std::path::Path,
        config: Config,
        backlog: StaticBacklog,
    ) -> Orchestrator<ScriptedLauncher, StaticBacklog> {
        let paths = WorkspacePaths::new(dir);
        Orchestrator::new(
            config,
            ScriptedLauncher::default(),
            backlog,
            StateStore::for_workspace(&paths),
            SignalFiles::for_workspace(&paths),
        )
    }

    #[test]
    fn summary_line_format() {
        let summary = IterationSummary {
            iteration: 4,
            ready: 5,
            building: 2,
            blocked: 1,
            active_workers: 3,
            max_workers: 3,
            spawned: 2,
            completed: 1,
            failed: 0,
            proposals: 1,
            roles: 2,
            warnings: 0,
            shutdown: true,
        };
        assert_eq!(
            summary.to_string(),
            "iter=4 ready=5 building=2 blocked=1 workers=3/3 +spawned=2 completed=1 failed=0 proposals=1 roles=2 warnings=0 shutdown"
        );
    }

    #[tokio::test]
    async fn spawns_workers_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(
            dir.path(),
            workers_only_config(),
            StaticBacklog(Ok(ready(&["1", "2", "3", "4"]))),
        );
        let mut state = DaemonState::new(0);

        let summary = orch.run_iteration(&mut state, 100).await;

        assert_eq!(summary.spawned, 3);
        assert_eq!(summary.active_workers, 3);
        assert_eq!(summary.ready, 4);
        assert!(!summary.shutdown);
        assert_eq!(state.workers.len(), 3);
        assert_eq!(state.totals.workers_spawned, 3);
        assert!(orch.launcher().spawned().iter().all(|job| matches!(
            job,
            JobKind::Worker {
                mode: WorkerMode::RequirePrApproval,
                ..
            }
        )));

        let saved = orch.store().load().unwrap();
        assert_eq!(saved.workers.len(), 3);
        assert_eq!(saved.iteration_count, 1);
        assert_eq!(saved.pipeline.ready_count, 4);
    }

    #[tokio::test]
    async fn second_iteration_respects_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(
            dir.path(),
            workers_only_config(),
            StaticBacklog(Ok(ready(&["1", "2", "3", "4", "5"]))),
        );
        let mut state = DaemonState::new(0);

        orch.run_iteration(&mut state, 100).await;
        orch.launcher.set(
            "job-1",
            JobStatus::Completed(JobOutput {
                exit_code: Some(0),
                lines: 1,
                tail: vec!["merged".into()],
            }),
        );
        let summary = orch.run_iteration(&mut state, 200).await;

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.spawned, 1);
        assert_eq!(state.workers.len(), 3);
        // Item 1 is still "ready" in the static snapshot, so it is picked again.
        let targets: Vec<&str> = state.workers.values().map(|w| w.target_id.as_str()).collect();
        assert!(targets.contains(&"1"));
    }

    #[tokio::test]
    async fn force_mode_auto_merges() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = workers_only_config();
        config.force_mode = true;
        let mut orch = orchestrator(dir.path(), config, StaticBacklog(Ok(ready(&["9"]))));
        let mut state = DaemonState::new(0);

        orch.run_iteration(&mut state, 100).await;

        assert_eq!(
            orch.launcher().spawned(),
            vec![JobKind::Worker {
                target_id: "9".into(),
                mode: WorkerMode::AutoMerge,
            }]
        );
    }

    #[tokio::test]
    async fn misuse_rejects_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(
            dir.path(),
            workers_only_config(),
            StaticBacklog(Ok(ready(&["1"]))),
        );
        *orch.launcher.first_output.lock().unwrap() =
            Some("error: unknown option '--dangerously'".into());
        let mut state = DaemonState::new(0);

        let summary = orch.run_iteration(&mut state, 100).await;

        assert_eq!(summary.spawned, 0);
        assert_eq!(summary.warnings, 1);
        assert!(state.workers.is_empty());
        assert_eq!(state.totals.spawn_failures, 1);
        assert_eq!(state.warnings[0].kind, WarningKind::SpawnFailed);
    }

    #[tokio::test]
    async fn backlog_failure_degrades_to_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(
            dir.path(),
            Config::default(),
            StaticBacklog(Err("rate limited".into())),
        );
        let mut state = DaemonState::new(0);

        let summary = orch.run_iteration(&mut state, 100).await;

        assert_eq!(summary.spawned + summary.proposals + summary.roles, 0);
        assert_eq!(summary.warnings, 1);
        assert_eq!(state.warnings[0].kind, WarningKind::BacklogUnreachable);
        assert!(orch.launcher().spawned().is_empty());
        // Persistence still happened.
        assert_eq!(orch.store().load().unwrap().iteration_count, 1);
    }

    #[tokio::test]
    async fn generator_trigger_starts_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = workers_only_config();
        config.issue_threshold = 3;
        let mut orch = orchestrator(dir.path(), config, StaticBacklog(Ok(BacklogSnapshot::default())));
        let mut state = DaemonState::new(0);

        let summary = orch.run_iteration(&mut state, 100).await;
        assert_eq!(summary.proposals, 2);
        assert_eq!(state.pipeline.last_trigger_at[&ProposalKind::Architect], 100);

        let summary = orch.run_iteration(&mut state, 200).await;
        assert_eq!(summary.proposals, 0);
        assert_eq!(state.totals.proposals_triggered, 2);
    }

    #[tokio::test]
    async fn role_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = workers_only_config();
        config.issue_threshold = 0;
        config.roles.insert(RoleName::Judge, RoleConfig::default());
        let interval = config.role(RoleName::Judge).interval_secs;
        let mut orch = orchestrator(dir.path(), config, StaticBacklog(Ok(BacklogSnapshot::default())));
        let mut state = DaemonState::new(0);

        let summary = orch.run_iteration(&mut state, 100).await;
        assert_eq!(summary.roles, 1);
        let judge = &state.support_roles[&RoleName::Judge];
        assert!(judge.running);
        assert_eq!(judge.job_id.as_deref(), Some("job-1"));

        // New output keeps the role busy past its interval.
        orch.launcher.set(
            "job-1",
            JobStatus::Running(JobOutput {
                exit_code: None,
                lines: 3,
                tail: vec!["reviewing PR #4".into()],
            }),
        );
        let summary = orch.run_iteration(&mut state, 100 + interval).await;
        assert_eq!(summary.roles, 0);
        assert_eq!(state.support_roles[&RoleName::Judge].idle_since, Some(100 + interval));

        // Silence past the interval replaces the idle instance.
        let summary = orch.run_iteration(&mut state, 101 + 2 * interval).await;
        assert_eq!(summary.roles, 1);
        assert_eq!(
            state.support_roles[&RoleName::Judge].job_id.as_deref(),
            Some("job-2")
        );
        assert_eq!(orch.launcher.terminated(), vec!["job-1".to_string()]);

        // An exited role is respawned on the same iteration.
        orch.launcher.set(
            "job-2",
            JobStatus::Completed(JobOutput::default()),
        );
        let summary = orch.run_iteration(&mut state, 102 + 2 * interval).await;
        assert_eq!(summary.roles, 1);
        assert_eq!(state.totals.roles_spawned, 3);
    }

    #[tokio::test]
    async fn failed_refresh_leaves_role_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = workers_only_config();
        config.roles.insert(RoleName::Judge, RoleConfig::default());
        let interval = config.role(RoleName::Judge).interval_secs;
        let mut orch = orchestrator(dir.path(), config, StaticBacklog(Ok(BacklogSnapshot::default())));
        let mut state = DaemonState::new(0);

        orch.run_iteration(&mut state, 100).await;
        *orch.launcher.first_output.lock().unwrap() =
            Some("sh: judge: command not found".into());

        let summary = orch.run_iteration(&mut state, 101 + interval).await;

        assert_eq!(summary.roles, 0);
        assert_eq!(summary.warnings, 1);
        assert_eq!(orch.launcher.terminated(), vec!["job-1".to_string()]);
        let judge = &state.support_roles[&RoleName::Judge];
        assert!(!judge.running);
        assert!(judge.job_id.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn role_refresh_keeps_one_live_process() {
        use crate::launcher::process::LauncherConfig;
        use crate::launcher::{ProcessLauncher, is_process_alive};

        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path());
        let mut config = workers_only_config();
        config.roles.insert(RoleName::Judge, RoleConfig::default());
        config.agent.program = "sh".into();
        config.agent.args = vec!["-c".into(), "exec sleep 30".into(), "agent".into()];
        let interval = config.role(RoleName::Judge).interval_secs;

        let launcher = ProcessLauncher::new(LauncherConfig::from_config(&config, &paths));
        let mut orch = Orchestrator::new(
            config,
            launcher,
            StaticBacklog(Ok(BacklogSnapshot::default())),
            StateStore::for_workspace(&paths),
            SignalFiles::for_workspace(&paths),
        );
        let mut state = DaemonState::new(0);

        orch.run_iteration(&mut state, 100).await;
        let first = state.support_roles[&RoleName::Judge].pid.unwrap();
        orch.run_iteration(&mut state, 101 + interval).await;
        let second = state.support_roles[&RoleName::Judge].pid.unwrap();
        assert_ne!(first, second);

        let mut first_gone = false;
        for _ in 0..200 {
            if !is_process_alive(first) {
                first_gone = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        let second_alive = is_process_alive(second);

        let handle = JobHandle {
            id: state.support_roles[&RoleName::Judge].job_id.clone().unwrap(),
            pid: Some(second),
        };
        orch.launcher().terminate(&handle).await;

        assert!(first_gone, "superseded role instance {first} is still alive");
        assert!(second_alive);
    }

    #[tokio::test]
    async fn stop_file_sets_shutdown_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(
            dir.path(),
            workers_only_config(),
            StaticBacklog(Ok(BacklogSnapshot::default())),
        );
        orch.signals().raise_stop(1).unwrap();
        let mut state = DaemonState::new(0);

        let summary = orch.run_iteration(&mut state, 100).await;
        assert!(summary.shutdown);
        assert!(summary.to_string().ends_with(" shutdown"));
    }
}
