//! Event type definitions
//!
//! An event is the unit of communication between b-threads: a name plus an
//! optional payload the engine treats as opaque data.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type alias for an event name
pub type EventName = String;

/// Event - immutable named value object
///
/// Identity is the name plus payload equality when a payload is present.
/// Payloads are opaque to the engine but must be comparable so that tests
/// and model-checking layers can deduplicate states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name
    pub name: EventName,
    /// Optional opaque payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Event {
    /// Create a payload-less event
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
        }
    }

    /// Create an event carrying a payload
    pub fn with_payload(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload: Some(payload),
        }
    }

    /// Get the event name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the payload, if any
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

// serde_json rejects non-finite numbers, so payload equality is reflexive.
impl Eq for Event {}

// Equal events must hash equal; the payload stays out of the hash because
// serde_json::Value is not hashable. Name collisions only cost lookups.
impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(payload) => write!(f, "{}({})", self.name, payload),
            None => write!(f, "{}", self.name),
        }
    }
}
