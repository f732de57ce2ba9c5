//! # Ensemble Runtime
//!
//! B-thread execution for the ensemble behavioral programming engine.
//!
//! This crate provides:
//! - Program handles: registration, external events, daemon mode, scopes
//! - The b-thread host interface (`BThreadContext`) and its channel-based
//!   continuations
//! - Program snapshots and the per-cycle arbiter
//! - Event selection strategies (deterministic priority and oracle-backed)
//! - The runner, lifecycle listeners, and run configuration
//!
//! A minimal program:
//!
//! ```no_run
//! use ensemble_runtime::{Program, Runner, SyncStatement};
//! use ensemble_core::Event;
//!
//! # async fn demo() -> Result<(), ensemble_runtime::EngineError> {
//! let program = Program::new("pingpong");
//! program.register_bthread("ping", |bp| async move {
//!     bp.sync(SyncStatement::new().request(Event::named("ping"))).await?;
//!     Ok(())
//! });
//! let _reason = Runner::new(program).run().await?;
//! # Ok(())
//! # }
//! ```

mod bthread;
mod config;
mod context;
mod error;
mod listeners;
mod program;
mod runner;
mod selection;
mod snapshot;

pub use bthread::{break_upon, BThreadScope, BThreadSyncSnapshot, BreakUponHandler};
pub use config::ProgramConfig;
pub use context::{BThreadContext, BodyError, BodyFuture};
pub use error::EngineError;
pub use listeners::{ListenerRegistry, RecordingListener, RunnerListener, TracingRunnerListener};
pub use program::{GlobalScope, Program};
pub use runner::{ExitReason, Runner};
pub use selection::{
    EventSelectionStrategy, FirstRequestedStrategy, OracleBackedStrategy, SeededOracle,
    SelectionOracle, SelectionResult,
};
pub use snapshot::{EquivalenceMode, ProgramSnapshot};

// Re-export the core vocabulary for convenience
pub use ensemble_core::{Event, EventSet, PredicateError, StatementError, SyncStatement};
