//! Synchronization statement
//!
//! The declaration a b-thread publishes at each synchronization point:
//! which events it requests, waits for, blocks, and treats as interrupts.

use serde::ser::{Serialize, Serializer};
use serde_json::json;

use crate::event::Event;
use crate::event_set::{EventSet, PredicateError};

/// Statement validation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatementError {
    /// A requested event is also in the statement's own block set.
    #[error("requested event '{event}' is also blocked by the same statement")]
    RequestedEventBlocked {
        /// The offending event name
        event: String,
    },
    /// A host predicate failed while validating the statement.
    #[error(transparent)]
    Predicate(#[from] PredicateError),
}

/// SyncStatement - one b-thread's per-cycle declaration
///
/// Missing fields default to an empty request and `EventSet::None`.
/// Statements are value-equal by structural comparison so model-checking
/// layers can deduplicate program states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SyncStatement {
    /// Events this b-thread proposes, in priority order
    pub request: Vec<Event>,
    /// Events this b-thread is willing to resume on
    pub wait_for: EventSet,
    /// Events this b-thread forbids
    pub block: EventSet,
    /// Events that remove this b-thread when selected
    pub interrupt: EventSet,
}

impl SyncStatement {
    /// Create an empty statement (requests nothing, waits for nothing)
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a single event, appended after any prior requests
    pub fn request(mut self, event: impl Into<Event>) -> Self {
        self.request.push(event.into());
        self
    }

    /// Request all listed events, in order
    pub fn request_all(mut self, events: impl IntoIterator<Item = Event>) -> Self {
        self.request.extend(events);
        self
    }

    /// Set the wait-for set
    pub fn wait_for(mut self, set: impl Into<EventSet>) -> Self {
        self.wait_for = set.into();
        self
    }

    /// Set the block set
    pub fn block(mut self, set: impl Into<EventSet>) -> Self {
        self.block = set.into();
        self
    }

    /// Set the interrupt set
    pub fn interrupt(mut self, set: impl Into<EventSet>) -> Self {
        self.interrupt = set.into();
        self
    }

    /// Would this statement wake for `event`?
    ///
    /// True when the event is requested or in the wait-for set.
    pub fn should_wake_for(&self, event: &Event) -> Result<bool, PredicateError> {
        if self.request.contains(event) {
            return Ok(true);
        }
        self.wait_for.contains(event)
    }

    /// Validate the statement at collection time.
    ///
    /// A b-thread that requests an event it also blocks has contradictory
    /// intent; such statements are rejected rather than silently resolved.
    pub fn validate(&self) -> Result<(), StatementError> {
        for event in &self.request {
            if self.block.contains(event)? {
                return Err(StatementError::RequestedEventBlocked {
                    event: event.name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// True when the statement can never wake its b-thread again
    /// (no requests and an empty wait-for set).
    pub fn is_inert(&self) -> bool {
        self.request.is_empty() && matches!(self.wait_for, EventSet::None)
    }
}

impl Serialize for SyncStatement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        json!({
            "request": self.request,
            "wait_for": self.wait_for,
            "block": self.block,
            "interrupt": self.interrupt,
        })
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(name: &str) -> Event {
        Event::named(name)
    }

    #[test]
    fn test_builder_defaults_are_empty() {
        let statement = SyncStatement::new();
        assert!(statement.request.is_empty());
        assert_eq!(statement.wait_for, EventSet::None);
        assert_eq!(statement.block, EventSet::None);
        assert_eq!(statement.interrupt, EventSet::None);
        assert!(statement.is_inert());
    }

    #[test]
    fn test_should_wake_for_requested_and_waited_events() {
        let statement = SyncStatement::new()
            .request(ev("hot"))
            .wait_for(EventSet::singleton(ev("cold")));

        assert!(statement.should_wake_for(&ev("hot")).expect("wake"));
        assert!(statement.should_wake_for(&ev("cold")).expect("wake"));
        assert!(!statement.should_wake_for(&ev("warm")).expect("wake"));
    }

    #[test]
    fn test_request_order_is_preserved() {
        let statement = SyncStatement::new()
            .request(ev("first"))
            .request(ev("second"))
            .request_all([ev("third")]);
        let names: Vec<_> = statement.request.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_validate_rejects_self_blocked_request() {
        let statement = SyncStatement::new()
            .request(ev("go"))
            .block(EventSet::of([ev("go")]));
        let err = statement.validate().expect_err("contradictory statement");
        assert!(matches!(
            err,
            StatementError::RequestedEventBlocked { event } if event == "go"
        ));
    }

    #[test]
    fn test_validate_accepts_disjoint_request_and_block() {
        let statement = SyncStatement::new()
            .request(ev("go"))
            .block(EventSet::of([ev("stop")]));
        statement.validate().expect("valid statement");
    }

    #[test]
    fn test_statements_are_value_equal() {
        let a = SyncStatement::new()
            .request(ev("go"))
            .block(EventSet::all_except(EventSet::of([ev("go")])));
        let b = SyncStatement::new()
            .request(ev("go"))
            .block(EventSet::all_except(EventSet::of([ev("go")])));
        assert_eq!(a, b);
    }
}
