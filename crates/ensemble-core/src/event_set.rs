//! EventSet algebra
//!
//! A decidable membership predicate over events, with pure combinators.
//! The arbiter may query `contains` many times per cycle, so sets never
//! mutate and never cache host-predicate answers (memoization is unsafe
//! for opaque host functions).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::ser::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::event::Event;

/// Fallible host-supplied membership predicate
pub type PredicateFn = dyn Fn(&Event) -> Result<bool, String> + Send + Sync;

/// A named, host-supplied membership predicate.
///
/// The engine treats the function as opaque and possibly failing; a failure
/// aborts the cycle rather than silently excluding events.
#[derive(Clone)]
pub struct HostPredicate {
    name: String,
    check: Arc<PredicateFn>,
}

impl HostPredicate {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Host predicate failure, identified by the offending set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("event-set predicate '{set}' failed on event '{event}': {message}")]
pub struct PredicateError {
    /// Name of the predicate set that failed
    pub set: String,
    /// Event the membership query was evaluated for
    pub event: String,
    /// Host-reported failure message
    pub message: String,
}

/// EventSet - membership predicate over events
///
/// Constructed from the algebraic variants or from a host predicate.
/// Combinators produce new sets without mutating their inputs.
#[derive(Clone)]
pub enum EventSet {
    /// Contains every event
    All,
    /// Contains no event
    None,
    /// Contains exactly one event
    Singleton(Event),
    /// Contains an explicit list of events
    Enumerated(Vec<Event>),
    /// Contains events in any inner set
    Union(Vec<EventSet>),
    /// Contains events in every inner set
    Intersection(Vec<EventSet>),
    /// Contains events NOT in the inner set
    Complement(Box<EventSet>),
    /// Contains events the host predicate accepts
    Predicate(HostPredicate),
}

impl EventSet {
    /// Set containing the listed events
    pub fn of(events: impl IntoIterator<Item = Event>) -> Self {
        Self::Enumerated(events.into_iter().collect())
    }

    /// Set containing exactly `event`
    pub fn singleton(event: impl Into<Event>) -> Self {
        Self::Singleton(event.into())
    }

    /// Set containing everything except the members of `inner`
    pub fn all_except(inner: EventSet) -> Self {
        Self::Complement(Box::new(inner))
    }

    /// Set backed by an infallible host predicate
    pub fn from_predicate<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self::from_try_predicate(name, move |event| Ok(predicate(event)))
    }

    /// Set backed by a fallible host predicate
    pub fn from_try_predicate<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Event) -> Result<bool, String> + Send + Sync + 'static,
    {
        Self::Predicate(HostPredicate {
            name: name.into(),
            check: Arc::new(predicate),
        })
    }

    /// Union of `self` and `other`
    pub fn or(self, other: EventSet) -> Self {
        Self::Union(vec![self, other])
    }

    /// Intersection of `self` and `other`
    pub fn and(self, other: EventSet) -> Self {
        Self::Intersection(vec![self, other])
    }

    /// Complement of `self`
    pub fn negate(self) -> Self {
        Self::Complement(Box::new(self))
    }

    /// Membership query.
    ///
    /// Pure and total for the algebraic variants; host predicates may fail,
    /// in which case the failure propagates with the predicate identified.
    pub fn contains(&self, event: &Event) -> Result<bool, PredicateError> {
        match self {
            Self::All => Ok(true),
            Self::None => Ok(false),
            Self::Singleton(member) => Ok(member == event),
            Self::Enumerated(members) => Ok(members.contains(event)),
            Self::Union(sets) => {
                for set in sets {
                    if set.contains(event)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Intersection(sets) => {
                for set in sets {
                    if !set.contains(event)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Complement(inner) => Ok(!inner.contains(event)?),
            Self::Predicate(predicate) => {
                (predicate.check)(event).map_err(|message| PredicateError {
                    set: predicate.name.clone(),
                    event: event.to_string(),
                    message,
                })
            }
        }
    }

    /// JSON description of the set shape, for logs and journals.
    ///
    /// Host predicates are described by name only; the function itself is
    /// opaque and cannot round-trip.
    pub fn describe(&self) -> Value {
        match self {
            Self::All => json!("all"),
            Self::None => json!("none"),
            Self::Singleton(event) => json!({ "singleton": event }),
            Self::Enumerated(events) => json!({ "enumerated": events }),
            Self::Union(sets) => {
                json!({ "union": sets.iter().map(EventSet::describe).collect::<Vec<_>>() })
            }
            Self::Intersection(sets) => {
                json!({ "intersection": sets.iter().map(EventSet::describe).collect::<Vec<_>>() })
            }
            Self::Complement(inner) => json!({ "complement": inner.describe() }),
            Self::Predicate(predicate) => json!({ "predicate": predicate.name }),
        }
    }
}

// Structural equality for the algebraic variants; predicates compare by
// name plus function identity, which keeps equality conservative without
// requiring predicate extensional equality (undecidable in general).
impl PartialEq for EventSet {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::All, Self::All) | (Self::None, Self::None) => true,
            (Self::Singleton(a), Self::Singleton(b)) => a == b,
            (Self::Enumerated(a), Self::Enumerated(b)) => a == b,
            (Self::Union(a), Self::Union(b)) => a == b,
            (Self::Intersection(a), Self::Intersection(b)) => a == b,
            (Self::Complement(a), Self::Complement(b)) => a == b,
            (Self::Predicate(a), Self::Predicate(b)) => {
                a.name == b.name && Arc::ptr_eq(&a.check, &b.check)
            }
            _ => false,
        }
    }
}

impl Eq for EventSet {}

impl Hash for EventSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::All | Self::None => {}
            Self::Singleton(event) => event.hash(state),
            Self::Enumerated(events) => events.hash(state),
            Self::Union(sets) | Self::Intersection(sets) => sets.hash(state),
            Self::Complement(inner) => inner.hash(state),
            Self::Predicate(predicate) => predicate.name.hash(state),
        }
    }
}

impl Default for EventSet {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Debug for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventSet({})", self.describe())
    }
}

impl Serialize for EventSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.describe().serialize(serializer)
    }
}

impl From<Event> for EventSet {
    fn from(event: Event) -> Self {
        Self::Singleton(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(name: &str) -> Event {
        Event::named(name)
    }

    #[test]
    fn test_all_and_none_contracts() {
        assert!(EventSet::All.contains(&ev("anything")).expect("contains"));
        assert!(!EventSet::None.contains(&ev("anything")).expect("contains"));
    }

    #[test]
    fn test_all_except_negates_membership() {
        let set = EventSet::all_except(EventSet::of([ev("hot")]));
        assert!(!set.contains(&ev("hot")).expect("contains"));
        assert!(set.contains(&ev("cold")).expect("contains"));
    }

    #[test]
    fn test_union_and_intersection() {
        let hot_or_cold = EventSet::singleton(ev("hot")).or(EventSet::singleton(ev("cold")));
        assert!(hot_or_cold.contains(&ev("hot")).expect("contains"));
        assert!(hot_or_cold.contains(&ev("cold")).expect("contains"));
        assert!(!hot_or_cold.contains(&ev("warm")).expect("contains"));

        let both = EventSet::of([ev("a"), ev("b")]).and(EventSet::of([ev("b"), ev("c")]));
        assert!(both.contains(&ev("b")).expect("contains"));
        assert!(!both.contains(&ev("a")).expect("contains"));
    }

    #[test]
    fn test_predicate_membership_and_failure() {
        let starts_with_t = EventSet::from_predicate("startsWithT", |e| e.name().starts_with('t'));
        assert!(starts_with_t.contains(&ev("tick")).expect("contains"));
        assert!(!starts_with_t.contains(&ev("beep")).expect("contains"));

        let failing = EventSet::from_try_predicate("broken", |_| Err("boom".to_string()));
        let err = failing.contains(&ev("tick")).expect_err("should fail");
        assert_eq!(err.set, "broken");
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_predicate_failure_propagates_through_combinators() {
        let failing = EventSet::from_try_predicate("broken", |_| Err("boom".to_string()));
        let union = EventSet::None.or(failing);
        assert!(union.contains(&ev("tick")).is_err());
    }

    #[test]
    fn test_equality_is_structural_and_predicates_compare_by_identity() {
        assert_eq!(
            EventSet::of([ev("a"), ev("b")]),
            EventSet::of([ev("a"), ev("b")])
        );
        assert_ne!(EventSet::All, EventSet::None);

        let p = EventSet::from_predicate("p", |_| true);
        let q = EventSet::from_predicate("p", |_| true);
        assert_eq!(p, p.clone());
        // Same name, different function instance: not equal.
        assert_ne!(p, q);
    }

    #[test]
    fn test_describe_shapes() {
        let set = EventSet::all_except(EventSet::from_predicate("mine", |_| true));
        assert_eq!(
            set.describe(),
            serde_json::json!({ "complement": { "predicate": "mine" } })
        );
    }
}
