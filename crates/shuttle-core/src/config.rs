//! Configuration resolution for Shuttle.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Workspace config (`.shuttle/config.toml`)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the binaries)
//!
//! The resolved [`Config`] is immutable for the lifetime of a daemon run.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::paths::WorkspacePaths;
use crate::state::{ProposalKind, RoleName};
use crate::store::DEFAULT_ARCHIVE_KEEP;

/// Default capacity of the worker pool.
pub const DEFAULT_MAX_WORKERS: usize = 3;

/// Complete Shuttle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Replenish the backlog while fewer than this many items are ready.
    pub issue_threshold: u32,
    /// Maximum concurrently active workers.
    pub max_workers: usize,
    pub poll_interval_secs: u64,
    /// Upper bound on the shutdown drain window.
    pub drain_timeout_secs: u64,
    pub drain_poll_secs: u64,
    /// How long to wait before the single verification poll after a spawn.
    pub spawn_verify_ms: u64,
    /// Workers running longer than this are reported once as stuck.
    pub worker_stuck_after_secs: u64,
    /// Number of archived state files kept on rotation.
    pub archive_keep: usize,
    /// Auto-merge worker PRs and let the champion auto-promote proposals.
    pub force_mode: bool,
    /// Log every decision and every rule that did not fire.
    pub debug_mode: bool,
    /// Abort startup on configuration issues instead of warning.
    pub strict_validation: bool,
    pub agent: AgentConfig,
    pub labels: LabelConfig,
    pub proposals: BTreeMap<ProposalKind, ProposalConfig>,
    pub roles: BTreeMap<RoleName, RoleConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            issue_threshold: 3,
            max_workers: DEFAULT_MAX_WORKERS,
            poll_interval_secs: 120,
            drain_timeout_secs: 300,
            drain_poll_secs: 5,
            spawn_verify_ms: 500,
            worker_stuck_after_secs: 2 * 60 * 60,
            archive_keep: DEFAULT_ARCHIVE_KEEP,
            force_mode: false,
            debug_mode: false,
            strict_validation: false,
            agent: AgentConfig::default(),
            labels: LabelConfig::default(),
            proposals: BTreeMap::new(),
            roles: BTreeMap::new(),
        }
    }
}

/// Program used to run every job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Path or name of the agent CLI binary.
    pub program: String,
    /// Arguments passed before the job prompt.
    pub args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec!["--dangerously-skip-permissions".to_string()],
        }
    }
}

/// Issue tracker labels that define backlog states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub ready: String,
    pub building: String,
    pub blocked: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            ready: "shuttle:ready".to_string(),
            building: "shuttle:building".to_string(),
            blocked: "shuttle:blocked".to_string(),
        }
    }
}

/// Per-kind proposal generator settings as written in the config file.
///
/// Unset fields resolve to the kind's defaults via [`Config::proposal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub cooldown_secs: Option<u64>,
    #[serde(default)]
    pub max_open: Option<u32>,
}

/// Per-role settings as written in the config file.
///
/// Unset fields resolve to the role's defaults via [`Config::role`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub depends_on: Option<Vec<RoleName>>,
}

const fn default_true() -> bool {
    true
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            label: None,
            cooldown_secs: None,
            max_open: None,
        }
    }
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: None,
            depends_on: None,
        }
    }
}

/// Fully resolved proposal generator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalSettings {
    pub enabled: bool,
    pub label: String,
    pub cooldown_secs: u64,
    pub max_open: u32,
}

/// Fully resolved support role settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub depends_on: Vec<RoleName>,
}

/// A problem found by [`Config::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigIssue {
    #[error("role {role} depends on {depends_on}, which is disabled")]
    MissingDependency {
        role: RoleName,
        depends_on: RoleName,
    },

    #[error("role {role} depends on itself")]
    SelfDependency { role: RoleName },

    #[error("proposal generators are enabled but champion is disabled and force mode is off; proposals will never be promoted")]
    ProposalsWithoutChampion,

    #[error("judge is disabled and force mode is off; worker pull requests will never be reviewed")]
    NoReviewer,

    #[error("max_workers is 0; falling back to {DEFAULT_MAX_WORKERS}")]
    ZeroCapacity,
}

impl Config {
    /// Resolved settings for a proposal generator kind.
    pub fn proposal(&self, kind: ProposalKind) -> ProposalSettings {
        let raw = self.proposals.get(&kind);
        ProposalSettings {
            enabled: raw.is_none_or(|p| p.enabled),
            label: raw
                .and_then(|p| p.label.clone())
                .unwrap_or_else(|| format!("shuttle:{kind}")),
            cooldown_secs: raw.and_then(|p| p.cooldown_secs).unwrap_or(30 * 60),
            max_open: raw.and_then(|p| p.max_open).unwrap_or(2),
        }
    }

    /// Resolved settings for a support role.
    pub fn role(&self, name: RoleName) -> RoleSettings {
        let raw = self.roles.get(&name);
        let (interval_secs, depends_on) = role_defaults(name);
        RoleSettings {
            enabled: raw.is_none_or(|r| r.enabled),
            interval_secs: raw.and_then(|r| r.interval_secs).unwrap_or(interval_secs),
            depends_on: raw
                .and_then(|r| r.depends_on.clone())
                .unwrap_or(depends_on),
        }
    }

    /// Proposal kinds with generation enabled, in evaluation order.
    pub fn enabled_proposal_kinds(&self) -> Vec<ProposalKind> {
        ProposalKind::ALL
            .into_iter()
            .filter(|k| self.proposal(*k).enabled)
            .collect()
    }

    /// Support roles that are enabled, in evaluation order.
    pub fn enabled_roles(&self) -> Vec<RoleName> {
        RoleName::ALL
            .into_iter()
            .filter(|r| self.role(*r).enabled)
            .collect()
    }

    /// Effective pool capacity.
    pub const fn worker_capacity(&self) -> usize {
        if self.max_workers == 0 {
            DEFAULT_MAX_WORKERS
        } else {
            self.max_workers
        }
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub const fn drain_poll(&self) -> Duration {
        Duration::from_secs(self.drain_poll_secs)
    }

    pub const fn spawn_verify_delay(&self) -> Duration {
        Duration::from_millis(self.spawn_verify_ms)
    }

    /// Check the role dependency graph and related settings.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.max_workers == 0 {
            issues.push(ConfigIssue::ZeroCapacity);
        }

        for role in self.enabled_roles() {
            for dep in self.role(role).depends_on {
                if dep == role {
                    issues.push(ConfigIssue::SelfDependency { role });
                } else if !self.role(dep).enabled {
                    issues.push(ConfigIssue::MissingDependency {
                        role,
                        depends_on: dep,
                    });
                }
            }
        }

        if !self.force_mode {
            if !self.enabled_proposal_kinds().is_empty() && !self.role(RoleName::Champion).enabled
            {
                issues.push(ConfigIssue::ProposalsWithoutChampion);
            }
            if !self.role(RoleName::Judge).enabled {
                issues.push(ConfigIssue::NoReviewer);
            }
        }

        issues
    }
}

/// Built-in `(interval_secs, depends_on)` for each role.
fn role_defaults(name: RoleName) -> (u64, Vec<RoleName>) {
    match name {
        RoleName::Guide => (15 * 60, Vec::new()),
        RoleName::Champion => (10 * 60, vec![RoleName::Guide]),
        RoleName::Doctor => (5 * 60, vec![RoleName::Judge]),
        RoleName::Auditor => (10 * 60, Vec::new()),
        RoleName::Judge => (5 * 60, Vec::new()),
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(paths: &WorkspacePaths) -> Result<Config> {
    let config_path = paths.config_file();
    let mut config = if config_path.exists() {
        load_config_file(&config_path)?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `SHUTTLE_*` environment variables on top of `config`.
pub fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(n) = lookup("SHUTTLE_MAX_WORKERS").and_then(|v| v.parse().ok()) {
        config.max_workers = n;
    }
    if let Some(n) = lookup("SHUTTLE_ISSUE_THRESHOLD").and_then(|v| v.parse().ok()) {
        config.issue_threshold = n;
    }
    if let Some(n) = lookup("SHUTTLE_POLL_INTERVAL").and_then(|v| v.parse().ok()) {
        config.poll_interval_secs = n;
    }
    if let Some(bin) = lookup("SHUTTLE_AGENT_BIN") {
        config.agent.program = bin;
    }
    if let Some(val) = lookup("SHUTTLE_FORCE") {
        config.force_mode = matches!(val.as_str(), "1" | "true" | "yes");
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_documented_thresholds() {
        let config = Config::default();
        assert_eq!(config.issue_threshold, 3);
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.poll_interval_secs, 120);
        assert_eq!(config.proposal(ProposalKind::Architect).cooldown_secs, 1800);
        assert_eq!(config.proposal(ProposalKind::Hermit).max_open, 2);
        assert_eq!(config.role(RoleName::Doctor).interval_secs, 300);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            max_workers = 5

            [proposals.architect]
            cooldown_secs = 60

            [roles.guide]
            interval_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.max_workers, 5);
        assert_eq!(config.issue_threshold, 3);
        let architect = config.proposal(ProposalKind::Architect);
        assert_eq!(architect.cooldown_secs, 60);
        assert_eq!(architect.max_open, 2);
        assert_eq!(architect.label, "shuttle:architect");
        assert!(config.proposal(ProposalKind::Hermit).enabled);
        assert_eq!(config.role(RoleName::Guide).interval_secs, 30);
        assert_eq!(config.role(RoleName::Champion).depends_on, vec![RoleName::Guide]);
    }

    #[test]
    fn disabled_dependency_is_reported() {
        let config: Config = toml::from_str(
            r"
            [roles.guide]
            enabled = false
            ",
        )
        .unwrap();

        assert_eq!(
            config.validate(),
            vec![ConfigIssue::MissingDependency {
                role: RoleName::Champion,
                depends_on: RoleName::Guide,
            }]
        );
    }

    #[test]
    fn self_dependency_is_reported() {
        let config: Config = toml::from_str(
            r#"
            [roles.auditor]
            depends_on = ["auditor"]
            "#,
        )
        .unwrap();

        assert!(
            config
                .validate()
                .contains(&ConfigIssue::SelfDependency {
                    role: RoleName::Auditor
                })
        );
    }

    #[test]
    fn force_mode_tolerates_missing_champion_and_judge() {
        let mut config: Config = toml::from_str(
            r#"
            [roles.champion]
            enabled = false

            [roles.judge]
            enabled = false

            [roles.doctor]
            depends_on = []
            "#,
        )
        .unwrap();

        let issues = config.validate();
        assert!(issues.contains(&ConfigIssue::ProposalsWithoutChampion));
        assert!(issues.contains(&ConfigIssue::NoReviewer));

        config.force_mode = true;
        assert!(config.validate().is_empty());
    }

    #[test]
    fn zero_capacity_falls_back_to_default() {
        let config = Config {
            max_workers: 0,
            ..Config::default()
        };
        assert_eq!(config.worker_capacity(), DEFAULT_MAX_WORKERS);
        assert!(config.validate().contains(&ConfigIssue::ZeroCapacity));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        apply_overrides(&mut config, |key| match key {
            "SHUTTLE_MAX_WORKERS" => Some("7".to_string()),
            "SHUTTLE_POLL_INTERVAL" => Some("not-a-number".to_string()),
            "SHUTTLE_FORCE" => Some("true".to_string()),
            "SHUTTLE_AGENT_BIN" => Some("/opt/agent".to_string()),
            _ => None,
        });

        assert_eq!(config.max_workers, 7);
        assert_eq!(config.poll_interval_secs, 120);
        assert!(config.force_mode);
        assert_eq!(config.agent.program, "/opt/agent");
    }

    #[test]
    fn load_config_reads_workspace_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path());
        std::fs::create_dir_all(paths.shuttle_dir()).unwrap();
        std::fs::write(paths.config_file(), "issue_threshold = 9\n").unwrap();

        let config = load_config(&paths).unwrap();
        assert_eq!(config.issue_threshold, 9);
    }

    #[test]
    fn load_config_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path());
        std::fs::create_dir_all(paths.shuttle_dir()).unwrap();
        std::fs::write(paths.config_file(), "max_workers = \"many\"\n").unwrap();

        let err = load_config(&paths).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn load_config_reports_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path());
        // A directory where the file should be cannot be read as text.
        std::fs::create_dir_all(paths.config_file()).unwrap();

        let err = load_config(&paths).unwrap_err();
        match &err {
            Error::ConfigRead { path, .. } => assert_eq!(path, &paths.config_file()),
            other => panic!("expected ConfigRead, got {other:?}"),
        }
    }
}
