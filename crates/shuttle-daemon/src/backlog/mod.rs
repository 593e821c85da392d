//! Backlog collaborator.
//!
//! The daemon only ever reads the backlog: counts of ready, building and
//! blocked items plus open proposals per kind. Items change state through the
//! jobs the daemon spawns, never through the daemon itself.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::future::Future;

use shuttle_core::state::ProposalKind;

pub mod github;

pub use github::GhBacklog;

/// A ready backlog item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogItem {
    pub id: String,
    /// RFC 3339 UTC creation time; these sort lexicographically.
    pub created_at: String,
}

impl BacklogItem {
    pub fn new(id: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: created_at.into(),
        }
    }
}

/// Oldest-ready-first: creation time ascending, then id ascending.
///
/// Numeric ids compare numerically so `#9` sorts before `#10`.
pub fn oldest_first(a: &BacklogItem, b: &BacklogItem) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| match (a.id.parse::<u64>(), b.id.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.id.cmp(&b.id),
        })
}

/// Point-in-time view of the backlog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BacklogSnapshot {
    pub ready: Vec<BacklogItem>,
    pub building: u32,
    pub blocked: u32,
    pub proposals: BTreeMap<ProposalKind, u32>,
}

impl BacklogSnapshot {
    #[allow(clippy::cast_possible_truncation)]
    pub fn ready_count(&self) -> u32 {
        self.ready.len() as u32
    }

    /// Open proposals of `kind` (zero when the kind was not queried).
    pub fn open_proposals(&self, kind: ProposalKind) -> u32 {
        self.proposals.get(&kind).copied().unwrap_or(0)
    }

    /// Ready items sorted oldest first.
    pub fn ordered_ready(&self) -> Vec<&BacklogItem> {
        let mut items: Vec<&BacklogItem> = self.ready.iter().collect();
        items.sort_by(|a, b| oldest_first(a, b));
        items
    }
}

/// Errors from querying the backlog.
#[derive(Debug, thiserror::Error)]
pub enum BacklogError {
    #[error("Backlog query failed: {reason}")]
    Unreachable { reason: String },

    #[error("Unexpected backlog response: {reason}")]
    Parse { reason: String },
}

/// Read-only access to the external backlog.
pub trait Backlog {
    fn snapshot(
        &self,
        kinds: &[ProposalKind],
    ) -> impl Future<Output = Result<BacklogSnapshot, BacklogError>> + Send;
}
