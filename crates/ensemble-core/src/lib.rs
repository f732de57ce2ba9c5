//! # Ensemble Core
//!
//! Core abstractions for the ensemble behavioral programming engine.
//!
//! This crate contains:
//! - Event and EventSet definitions (the value vocabulary of a b-program)
//! - SyncStatement, the per-cycle declaration a b-thread publishes
//!
//! This crate does NOT care about:
//! - How b-thread bodies are suspended and resumed
//! - Which event gets selected in a cycle
//! - Program lifecycle, listeners, or external event queues

pub mod event;
pub mod event_set;
pub mod statement;

pub use event::{Event, EventName};
pub use event_set::{EventSet, PredicateError};
pub use statement::{StatementError, SyncStatement};
