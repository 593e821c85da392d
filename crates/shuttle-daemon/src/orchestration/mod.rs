//! Orchestration: worker pool, decision engine, iteration executor and the
//! control loop that drives them.
//!
//! - [`WorkerPool`]: slot accounting and reconciliation of worker jobs.
//! - [`decide`]: the pure decision matrix run once per iteration.
//! - [`Orchestrator`]: executes one iteration end to end.
//! - [`ControlLoop`]: startup, the poll loop, drain and shutdown.

pub mod control;
pub mod decision;
pub mod iteration;
pub mod pool;

pub use control::{ControlLoop, DaemonPhase, LoopTiming, StartupError, spawn_signal_listener};
pub use decision::{Decision, decide, explain};
pub use iteration::{IterationSummary, Orchestrator};
pub use pool::{PoolError, SlotPermit, WorkerOutcome, WorkerPool};
