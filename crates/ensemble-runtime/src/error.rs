//! Engine error types
//!
//! Recoverable usage errors (`SnapshotReused`) are returned to the caller
//! and leave state unchanged. Cycle-internal errors abort the current run
//! and surface through the `halted` listener callback. Deadlock is a
//! normal exit reason, not an error.

use ensemble_core::PredicateError;

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A b-thread body returned an error or panicked.
    #[error("b-thread '{bthread}' failed: {message}")]
    BodyFailure {
        /// Name of the failing b-thread
        bthread: String,
        /// Failure description
        message: String,
    },

    /// A break-upon handler attempted to synchronize.
    #[error("b-thread '{bthread}' attempted to synchronize inside a break-upon handler; enqueue an external event instead")]
    BreakUponMisuse {
        /// Name of the interrupted b-thread
        bthread: String,
    },

    /// A snapshot was advanced a second time.
    #[error("snapshot was already advanced once and cannot be triggered again")]
    SnapshotReused,

    /// A b-thread published a contradictory sync statement.
    #[error("invalid sync statement from b-thread '{bthread}': {reason}")]
    InvalidStatement {
        /// Name of the offending b-thread
        bthread: String,
        /// Why the statement was rejected
        reason: String,
    },

    /// A b-thread assertion did not hold.
    #[error("assertion failed in b-thread '{bthread}': {message}")]
    AssertionFailed {
        /// Name of the asserting b-thread
        bthread: String,
        /// Assertion message
        message: String,
    },

    /// A host-supplied event-set predicate failed.
    #[error(transparent)]
    Predicate(#[from] PredicateError),

    /// A superstep ran past its configured wall-clock budget.
    #[error("superstep exceeded its {budget_ms} ms budget")]
    CycleTimeout {
        /// The configured budget in milliseconds
        budget_ms: u64,
    },

    /// Invariant violation inside the engine itself.
    #[error("internal engine error: {0}")]
    Internal(String),
}
