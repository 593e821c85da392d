//! Post-spawn verification.
//!
//! A background spawn can "succeed" while the job is already dead: the agent
//! CLI rejected a flag, or a wrapper script could not find its tool. Such a
//! job would sit in the worker table forever as a phantom. Every background
//! spawn is therefore polled once, after a short delay, before it is
//! registered anywhere.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use super::{JobHandle, JobKind, JobStatus, Launcher, SpawnError};

/// Error signatures that mean the host tool was invoked incorrectly.
static MISUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)unknown option|command not found|unrecogni[sz]ed (?:option|argument)|invalid option|no such file or directory",
    )
    .expect("static regex is valid")
});

/// First output line matching a tool-misuse signature, if any.
pub fn misuse_signature(lines: &[String]) -> Option<&str> {
    lines
        .iter()
        .map(String::as_str)
        .find(|line| MISUSE_RE.is_match(line))
}

/// Wait `delay`, poll `handle` once, and reject the spawn if it is a phantom.
///
/// Returns the observed status when the job looks healthy.
pub async fn verify_spawn<L: Launcher>(
    launcher: &L,
    job: &JobKind,
    handle: &JobHandle,
    delay: Duration,
) -> Result<JobStatus, SpawnError> {
    if handle.id.is_empty() {
        return Err(SpawnError::MissingId {
            job: job.to_string(),
        });
    }

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let status = launcher.poll(handle).await;
    let rejection = match &status {
        JobStatus::Running(output) | JobStatus::Completed(output) => misuse_signature(&output.tail)
            .map(|line| SpawnError::Misuse {
                job: job.to_string(),
                line: line.to_string(),
            }),
        JobStatus::Failed(reason) => Some(if MISUSE_RE.is_match(reason) {
            SpawnError::Misuse {
                job: job.to_string(),
                line: reason.clone(),
            }
        } else {
            SpawnError::ExitedEarly {
                job: job.to_string(),
                reason: reason.clone(),
            }
        }),
        JobStatus::Pending => None,
    };

    if let Some(err) = rejection {
        warn!(job = %job, job_id = %handle.id, error = %err, "Spawn verification failed");
        launcher.release(handle).await;
        return Err(err);
    }

    debug!(job = %job, job_id = %handle.id, "Spawn verified");
    Ok(status)
}
