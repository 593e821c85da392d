//! GitHub issues backlog, queried through the `gh` CLI.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use shuttle_core::config::Config;
use shuttle_core::state::ProposalKind;

use super::{Backlog, BacklogError, BacklogItem, BacklogSnapshot};

/// Issues requested by the first query for a label; doubled until a query
/// comes back short.
const DEFAULT_PAGE_SIZE: u32 = 200;

/// Oldest first, so a short list still holds the items workers take next.
const OLDEST_FIRST: &str = "sort:created-asc";

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    #[serde(rename = "createdAt")]
    created_at: String,
}

/// [`Backlog`] backed by `gh issue list`.
#[derive(Debug, Clone)]
pub struct GhBacklog {
    program: PathBuf,
    /// Arguments placed before the `issue list` subcommand.
    prefix_args: Vec<String>,
    workspace: PathBuf,
    ready_label: String,
    building_label: String,
    blocked_label: String,
    proposal_labels: BTreeMap<ProposalKind, String>,
    page_size: u32,
}

impl GhBacklog {
    pub fn new(config: &Config, workspace: PathBuf) -> Self {
        let proposal_labels = ProposalKind::ALL
            .into_iter()
            .map(|kind| (kind, config.proposal(kind).label))
            .collect();
        Self {
            program: PathBuf::from("gh"),
            prefix_args: Vec::new(),
            workspace,
            ready_label: config.labels.ready.clone(),
            building_label: config.labels.building.clone(),
            blocked_label: config.labels.blocked.clone(),
            proposal_labels,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Use a different `gh` executable, optionally behind a wrapper
    /// (`prefix_args` are passed before `issue list ...`).
    #[must_use]
    pub fn with_command(mut self, program: impl Into<PathBuf>, prefix_args: Vec<String>) -> Self {
        self.program = program.into();
        self.prefix_args = prefix_args;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Every open issue carrying `label`, oldest first.
    async fn list(&self, label: &str) -> Result<Vec<GhIssue>, BacklogError> {
        let mut limit = self.page_size;
        loop {
            let issues = self.list_limited(label, limit).await?;
            if issues.len() < limit as usize || limit == u32::MAX {
                return Ok(issues);
            }
            debug!(label, limit, "Issue list hit the limit, retrying with a larger one");
            limit = limit.saturating_mul(2);
        }
    }

    async fn list_limited(&self, label: &str, limit: u32) -> Result<Vec<GhIssue>, BacklogError> {
        let output = Command::new(&self.program)
            .current_dir(&self.workspace)
            .args(&self.prefix_args)
            .args(["issue", "list", "--label", label, "--state", "open"])
            .args(["--search", OLDEST_FIRST])
            .args(["--json", "number,createdAt", "--limit"])
            .arg(limit.to_string())
            .output()
            .await
            .map_err(|e| BacklogError::Unreachable {
                reason: format!("failed to run {}: {e}", self.program.display()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BacklogError::Unreachable {
                reason: format!("gh issue list --label {label}: {}", stderr.trim()),
            });
        }

        let issues: Vec<GhIssue> =
            serde_json::from_slice(&output.stdout).map_err(|e| BacklogError::Parse {
                reason: format!("label {label}: {e}"),
            })?;
        debug!(label, count = issues.len(), "Listed issues");
        Ok(issues)
    }

    #[allow(clippy::cast_possible_truncation)]
    async fn count(&self, label: &str) -> Result<u32, BacklogError> {
        Ok(self.list(label).await?.len() as u32)
    }
}

impl Backlog for GhBacklog {
    async fn snapshot(&self, kinds: &[ProposalKind]) -> Result<BacklogSnapshot, BacklogError> {
        let ready = self
            .list(&self.ready_label)
            .await?
            .into_iter()
            .map(|issue| BacklogItem::new(issue.number.to_string(), issue.created_at))
            .collect();
        let building = self.count(&self.building_label).await?;
        let blocked = self.count(&self.blocked_label).await?;

        let mut proposals = BTreeMap::new();
        for kind in kinds {
            if let Some(label) = self.proposal_labels.get(kind) {
                proposals.insert(*kind, self.count(label).await?);
            }
        }

        Ok(BacklogSnapshot {
            ready,
            building,
            blocked,
            proposals,
        })
    }
}
