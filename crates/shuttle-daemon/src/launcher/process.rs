//! Agent subprocess launcher.
//!
//! Runs every job as a child process of the configured agent CLI, with the
//! workspace as working directory. Stdout and stderr are read line by line
//! into a bounded tail; a monitor task records the exit status once both
//! streams are drained. Children are never killed when the daemon exits:
//! workers wind down cooperatively through the drain signal.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shuttle_core::config::Config;
use shuttle_core::paths::WorkspacePaths;
use shuttle_core::state::RoleName;

use super::{JobHandle, JobKind, JobOutput, JobStatus, Launcher, SpawnError, SpawnOutcome, WorkerMode};

/// Number of output lines retained per job.
const OUTPUT_TAIL_LINES: usize = 20;

/// Settings for [`ProcessLauncher`].
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Agent binary.
    pub program: PathBuf,
    /// Arguments placed before `-p <prompt>`.
    pub args: Vec<String>,
    /// Working directory for every job.
    pub workspace: PathBuf,
    /// Drain signal path exported to jobs as `SHUTTLE_DRAIN_SIGNAL`.
    pub drain_signal: PathBuf,
    /// Lets the champion auto-promote proposals.
    pub force_mode: bool,
}

impl LauncherConfig {
    pub fn from_config(config: &Config, paths: &WorkspacePaths) -> Self {
        Self {
            program: PathBuf::from(&config.agent.program),
            args: config.agent.args.clone(),
            workspace: paths.workspace().to_path_buf(),
            drain_signal: paths.drain_signal(),
            force_mode: config.force_mode,
        }
    }
}

#[derive(Debug)]
enum ExitState {
    Exited(Option<i32>),
    WaitError(String),
}

#[derive(Debug, Default)]
struct TrackedJob {
    lines: u64,
    tail: VecDeque<String>,
    exit: Option<ExitState>,
}

impl TrackedJob {
    fn push_line(&mut self, line: String) {
        self.lines += 1;
        self.tail.push_back(line);
        if self.tail.len() > OUTPUT_TAIL_LINES {
            self.tail.pop_front();
        }
    }

    fn output(&self) -> JobOutput {
        JobOutput {
            exit_code: match self.exit {
                Some(ExitState::Exited(code)) => code,
                _ => None,
            },
            lines: self.lines,
            tail: self.tail.iter().cloned().collect(),
        }
    }

    fn status(&self) -> JobStatus {
        match &self.exit {
            None if self.lines == 0 => JobStatus::Pending,
            None => JobStatus::Running(self.output()),
            Some(ExitState::Exited(Some(0))) => JobStatus::Completed(self.output()),
            Some(ExitState::Exited(code)) => {
                let output = self.output();
                let detail = output.summary().unwrap_or_default();
                match code {
                    Some(code) => JobStatus::Failed(format!("exited with code {code}: {detail}")),
                    None => JobStatus::Failed(format!("terminated by signal: {detail}")),
                }
            }
            Some(ExitState::WaitError(e)) => JobStatus::Failed(format!("wait error: {e}")),
        }
    }
}

type JobMap = Arc<RwLock<HashMap<String, TrackedJob>>>;

/// [`Launcher`] that runs jobs as agent subprocesses.
pub struct ProcessLauncher {
    config: LauncherConfig,
    /// Jobs started by this process, keyed by job id.
    jobs: JobMap,
}

impl ProcessLauncher {
    pub fn new(config: LauncherConfig) -> Self {
        Self {
            config,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The prompt handed to the agent for `job`.
    pub fn prompt_for(&self, job: &JobKind) -> String {
        match job {
            JobKind::Worker {
                target_id,
                mode: WorkerMode::AutoMerge,
            } => format!("/shepherd {target_id} --merge"),
            JobKind::Worker { target_id, .. } => format!("/shepherd {target_id}"),
            JobKind::ProposalGenerator(kind) => format!("/{kind}"),
            JobKind::Role(RoleName::Champion) if self.config.force_mode => {
                "/champion --force".to_string()
            }
            JobKind::Role(name) => format!("/{name}"),
        }
    }

    /// Number of jobs currently tracked (running or finished but unreleased).
    pub async fn tracked_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    fn build_command(&self, job: &JobKind, job_id: &str) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.current_dir(&self.config.workspace)
            .args(&self.config.args)
            .arg("-p")
            .arg(self.prompt_for(job))
            .env("SHUTTLE_JOB_ID", job_id)
            .env("SHUTTLE_DRAIN_SIGNAL", &self.config.drain_signal)
            .env("SHUTTLE_WORKSPACE", &self.config.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        cmd
    }

    /// Start the subprocess and its reader/monitor tasks.
    async fn launch(&self, job: &JobKind) -> Result<(JobHandle, JoinHandle<()>), SpawnError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let mut cmd = self.build_command(job, &job_id);

        info!(
            job = %job,
            job_id = %job_id,
            program = %self.config.program.display(),
            "Spawning job"
        );
        let mut child = cmd.spawn().map_err(|e| SpawnError::LaunchFailed {
            job: job.to_string(),
            reason: e.to_string(),
        })?;
        let pid = child.id();

        let stdout = child.stdout.take().ok_or_else(|| SpawnError::LaunchFailed {
            job: job.to_string(),
            reason: "Failed to capture stdout".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| SpawnError::LaunchFailed {
            job: job.to_string(),
            reason: "Failed to capture stderr".to_string(),
        })?;

        // Register before the readers start so no line is dropped.
        self.jobs
            .write()
            .await
            .insert(job_id.clone(), TrackedJob::default());

        let stdout_task = spawn_reader(stdout, job_id.clone(), Arc::clone(&self.jobs), "stdout");
        let stderr_task = spawn_reader(stderr, job_id.clone(), Arc::clone(&self.jobs), "stderr");

        let jobs = Arc::clone(&self.jobs);
        let id = job_id.clone();
        let monitor = tokio::spawn(async move {
            let result = child.wait().await;
            // Drain both streams so the recorded tail is complete at exit.
            let _ = stdout_task.await;
            let _ = stderr_task.await;

            let exit = match result {
                Ok(status) => {
                    info!(job_id = %id, ?status, "Job exited");
                    ExitState::Exited(status.code())
                }
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Error waiting for job");
                    ExitState::WaitError(e.to_string())
                }
            };
            if let Some(job) = jobs.write().await.get_mut(&id) {
                job.exit = Some(exit);
            }
        });

        Ok((JobHandle { id: job_id, pid }, monitor))
    }
}

impl Launcher for ProcessLauncher {
    async fn spawn(&self, job: &JobKind, background: bool) -> Result<SpawnOutcome, SpawnError> {
        let (handle, monitor) = self.launch(job).await?;
        if background {
            return Ok(SpawnOutcome::Background(handle));
        }

        monitor.await.map_err(|e| SpawnError::ExitedEarly {
            job: job.to_string(),
            reason: e.to_string(),
        })?;
        let finished = self.jobs.write().await.remove(&handle.id);
        match finished {
            Some(TrackedJob {
                exit: Some(ExitState::WaitError(reason)),
                ..
            }) => Err(SpawnError::ExitedEarly {
                job: job.to_string(),
                reason,
            }),
            Some(tracked) => Ok(SpawnOutcome::Finished(tracked.output())),
            None => Ok(SpawnOutcome::Finished(JobOutput::default())),
        }
    }

    async fn poll(&self, handle: &JobHandle) -> JobStatus {
        if let Some(job) = self.jobs.read().await.get(&handle.id) {
            return job.status();
        }

        // Started by a previous daemon process: all we can check is liveness.
        match handle.pid {
            Some(pid) if is_process_alive(pid) => JobStatus::Running(JobOutput::default()),
            Some(pid) => {
                debug!(job_id = %handle.id, pid, "Untracked job is no longer alive");
                JobStatus::Completed(JobOutput::default())
            }
            None => JobStatus::Failed("job is not tracked and has no pid".to_string()),
        }
    }

    async fn release(&self, handle: &JobHandle) {
        if self.jobs.write().await.remove(&handle.id).is_some() {
            debug!(job_id = %handle.id, "Released job");
        }
    }

    async fn terminate(&self, handle: &JobHandle) {
        if let Some(pid) = handle.pid {
            info!(job_id = %handle.id, pid, "Terminating job");
            request_exit(pid);
        }
        self.release(handle).await;
    }
}

fn spawn_reader<R>(reader: R, job_id: String, jobs: JobMap, stream: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        // Read until EOF whatever the bytes are; the pipe stays open for as
        // long as the child lives.
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = decode_line(&buf);
                    debug!(job_id = %job_id, stream, "{}", line);
                    if let Some(job) = jobs.write().await.get_mut(&job_id) {
                        job.push_line(line);
                    }
                }
                Err(e) => {
                    warn!(job_id = %job_id, stream, error = %e, "Failed to read job output");
                    break;
                }
            }
        }
    })
}

/// Strip the line terminator and replace invalid UTF-8.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Whether a process with `pid` currently exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only performs existence and permission checks;
    // nothing is delivered to the target process.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Whether a process with `pid` currently exists.
#[cfg(not(unix))]
pub const fn is_process_alive(_pid: u32) -> bool {
    false
}

/// Send SIGTERM to `pid`. A process that is already gone is not an error.
#[cfg(unix)]
fn request_exit(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) with SIGTERM on a pid we spawned; the job decides how
    // to shut down.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(raw, libc::SIGTERM) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, error = %err, "Failed to send SIGTERM");
        }
    }
}

#[cfg(not(unix))]
fn request_exit(pid: u32) {
    debug!(pid, "No termination signal on this platform");
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use shuttle_core::state::ProposalKind;
    use std::time::Duration;

    fn launcher_with(program: &str, args: &[&str], force_mode: bool) -> ProcessLauncher {
        ProcessLauncher::new(LauncherConfig {
            program: PathBuf::from(program),
            args: args.iter().map(ToString::to_string).collect(),
            workspace: std::env::temp_dir(),
            drain_signal: std::env::temp_dir().join("shuttle-test-stop-workers"),
            force_mode,
        })
    }

    async fn wait_terminal(launcher: &ProcessLauncher, handle: &JobHandle) -> JobStatus {
        for _ in 0..200 {
            let status = launcher.poll(handle).await;
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job did not finish in time");
    }

    #[test]
    fn prompts_follow_job_kind() {
        let launcher = launcher_with("agent", &[], false);
        assert_eq!(
            launcher.prompt_for(&JobKind::Worker {
                target_id: "7".into(),
                mode: WorkerMode::RequirePrApproval,
            }),
            "/shepherd 7"
        );
        assert_eq!(
            launcher.prompt_for(&JobKind::Worker {
                target_id: "7".into(),
                mode: WorkerMode::AutoMerge,
            }),
            "/shepherd 7 --merge"
        );
        assert_eq!(
            launcher.prompt_for(&JobKind::ProposalGenerator(ProposalKind::Architect)),
            "/architect"
        );
        assert_eq!(launcher.prompt_for(&JobKind::Role(RoleName::Champion)), "/champion");

        let forced = launcher_with("agent", &[], true);
        assert_eq!(
            forced.prompt_for(&JobKind::Role(RoleName::Champion)),
            "/champion --force"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn background_job_output_is_captured() {
        // `sh -c script argv0 -p <prompt>` exposes the prompt as $2.
        let launcher = launcher_with("sh", &["-c", "echo \"got $2\"; echo done", "agent"], false);
        let job = JobKind::Role(RoleName::Guide);

        let SpawnOutcome::Background(handle) = launcher.spawn(&job, true).await.unwrap() else {
            panic!("expected a background handle");
        };
        assert!(!handle.id.is_empty());
        assert!(handle.pid.is_some());

        match wait_terminal(&launcher, &handle).await {
            JobStatus::Completed(output) => {
                assert_eq!(output.exit_code, Some(0));
                assert_eq!(output.tail, vec!["got /guide", "done"]);
                assert_eq!(output.lines, 2);
            }
            other => panic!("expected Completed, got {other:?}"),
        }

        launcher.release(&handle).await;
        assert_eq!(launcher.tracked_count().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn foreground_job_returns_output() {
        let launcher = launcher_with("sh", &["-c", "echo $SHUTTLE_JOB_ID | wc -c", "agent"], false);
        let outcome = launcher
            .spawn(&JobKind::ProposalGenerator(ProposalKind::Hermit), false)
            .await
            .unwrap();

        let SpawnOutcome::Finished(output) = outcome else {
            panic!("expected a finished job");
        };
        assert_eq!(output.exit_code, Some(0));
        // uuid (36 chars) plus newline
        assert_eq!(output.summary().as_deref(), Some("37"));
        assert_eq!(launcher.tracked_count().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_failed() {
        let launcher = launcher_with("sh", &["-c", "echo boom >&2; exit 3", "agent"], false);
        let SpawnOutcome::Background(handle) = launcher
            .spawn(&JobKind::Role(RoleName::Doctor), true)
            .await
            .unwrap()
        else {
            panic!("expected a background handle");
        };

        match wait_terminal(&launcher, &handle).await {
            JobStatus::Failed(reason) => {
                assert!(reason.contains("code 3"), "{reason}");
                assert!(reason.contains("boom"), "{reason}");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invalid_utf8_output_does_not_stop_reading() {
        let launcher = launcher_with(
            "sh",
            &[
                "-c",
                "printf 'start\\n\\377\\376\\n'; head -c 300000 /dev/zero | tr '\\0' a; echo; echo done",
                "agent",
            ],
            false,
        );
        let SpawnOutcome::Background(handle) = launcher
            .spawn(&JobKind::Role(RoleName::Auditor), true)
            .await
            .unwrap()
        else {
            panic!("expected a background handle");
        };

        match wait_terminal(&launcher, &handle).await {
            JobStatus::Completed(output) => {
                assert_eq!(output.lines, 4);
                assert_eq!(output.tail[0], "start");
                assert_eq!(output.tail[1], "\u{fffd}\u{fffd}");
                assert_eq!(output.tail[2].len(), 300_000);
                assert_eq!(output.summary().as_deref(), Some("done"));
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[test]
    fn decode_line_strips_terminators() {
        assert_eq!(decode_line(b"ok\r\n"), "ok");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"bad \xff\n"), "bad \u{fffd}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_stops_process_and_tracking() {
        let launcher = launcher_with("sh", &["-c", "exec sleep 30", "agent"], false);
        let SpawnOutcome::Background(handle) = launcher
            .spawn(&JobKind::Role(RoleName::Judge), true)
            .await
            .unwrap()
        else {
            panic!("expected a background handle");
        };
        let pid = handle.pid.unwrap();
        assert!(is_process_alive(pid));

        launcher.terminate(&handle).await;
        assert_eq!(launcher.tracked_count().await, 0);

        // The monitor task reaps the child once it exits.
        for _ in 0..200 {
            if !is_process_alive(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("terminated job {pid} is still alive");
    }

    #[tokio::test]
    async fn missing_program_fails_to_launch() {
        let launcher = launcher_with("/nonexistent/shuttle-agent-binary", &[], false);
        let err = launcher
            .spawn(&JobKind::Role(RoleName::Auditor), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SpawnError::LaunchFailed { .. }));
        assert_eq!(launcher.tracked_count().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn untracked_handle_uses_pid_liveness() {
        let launcher = launcher_with("agent", &[], false);

        let alive = JobHandle {
            id: "from-previous-run".into(),
            pid: Some(std::process::id()),
        };
        assert!(matches!(launcher.poll(&alive).await, JobStatus::Running(_)));

        let no_pid = JobHandle {
            id: "lost".into(),
            pid: None,
        };
        assert!(matches!(launcher.poll(&no_pid).await, JobStatus::Failed(_)));
    }

    #[cfg(unix)]
    #[test]
    fn own_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(u32::MAX));
    }
}
