//! `Shuttle` Core Library
//!
//! Shared functionality for `Shuttle` components:
//! - Configuration resolution and validation
//! - Daemon state model and its on-disk store
//! - Filesystem signal files used for stop/drain coordination
//! - Common error types and tracing setup

pub mod config;
pub mod error;
pub mod paths;
pub mod signals;
pub mod state;
pub mod store;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::WorkspacePaths;
pub use state::{DaemonState, PipelineCounters, ProposalKind, RoleName, RoleRecord, WorkerRecord};
pub use store::StateStore;
