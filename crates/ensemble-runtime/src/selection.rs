//! Event selection strategies
//!
//! Given the statements of every suspended b-thread plus the external
//! queue, a strategy computes the selectable set and picks one event.
//! Blocking always dominates: a blocked event is never selectable, no
//! matter who requested it.

use std::sync::Mutex;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use ensemble_core::Event;

use crate::error::EngineError;
use crate::program::lock_unpoisoned;
use crate::snapshot::ProgramSnapshot;

/// A selected event, together with the external-queue index it came from
/// (if any) so the arbiter can drop the consumed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionResult {
    /// The selected event
    pub event: Event,
    /// Queue index when the event was taken from the external queue
    pub external_index: Option<usize>,
}

impl SelectionResult {
    /// An internally requested event
    pub fn internal(event: Event) -> Self {
        Self {
            event,
            external_index: None,
        }
    }

    /// An event consumed from the external queue
    pub fn external(event: Event, index: usize) -> Self {
        Self {
            event,
            external_index: Some(index),
        }
    }
}

/// Event selection strategy
///
/// Implementations must be pure with respect to the snapshot: repeated
/// calls may only differ through a strategy's own oracle state.
pub trait EventSelectionStrategy: Send + Sync {
    /// Every event that could legally be selected at this snapshot,
    /// requested events first (registration order, then request-list
    /// order), then non-blocked external events in FIFO order. Each
    /// event appears at most once.
    fn selectable_events(&self, snapshot: &ProgramSnapshot) -> Result<Vec<Event>, EngineError> {
        Ok(selectable_candidates(snapshot)?
            .into_iter()
            .map(|candidate| candidate.event)
            .collect())
    }

    /// Pick one selectable event, or `None` when nothing is selectable.
    fn select(&self, snapshot: &ProgramSnapshot) -> Result<Option<SelectionResult>, EngineError>;
}

/// Is `event` forbidden by any b-thread's block set?
fn is_blocked(snapshot: &ProgramSnapshot, event: &Event) -> Result<bool, EngineError> {
    for statement in snapshot.statements() {
        if statement.block.contains(event)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// All selectable events in deterministic order: requested events
/// (deduplicated, first occurrence wins) before external ones.
fn selectable_candidates(
    snapshot: &ProgramSnapshot,
) -> Result<Vec<SelectionResult>, EngineError> {
    let mut candidates: Vec<SelectionResult> = Vec::new();

    for statement in snapshot.statements() {
        for event in &statement.request {
            let already_seen = candidates
                .iter()
                .any(|candidate| &candidate.event == event);
            if !already_seen && !is_blocked(snapshot, event)? {
                candidates.push(SelectionResult::internal(event.clone()));
            }
        }
    }

    // The selectable set is (requested ∪ external) \ blocked: a queue
    // entry whose event is already selectable adds no new candidate.
    for (index, event) in snapshot.external_events().iter().enumerate() {
        let already_selectable = candidates
            .iter()
            .any(|candidate| &candidate.event == event);
        if !already_selectable && !is_blocked(snapshot, event)? {
            candidates.push(SelectionResult::external(event.clone(), index));
        }
    }

    Ok(candidates)
}

/// Deterministic priority selection: the first non-blocked requested
/// event in (registration index, request position) order; external events
/// are considered only when no internal request is selectable.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstRequestedStrategy;

impl EventSelectionStrategy for FirstRequestedStrategy {
    fn select(&self, snapshot: &ProgramSnapshot) -> Result<Option<SelectionResult>, EngineError> {
        Ok(selectable_candidates(snapshot)?.into_iter().next())
    }
}

/// Pluggable choice point over the full selectable set.
///
/// Model-checking layers implement this to branch over every selectable
/// event; [`SeededOracle`] provides deterministic-random exploration.
pub trait SelectionOracle: Send {
    /// Choose an index into `selectable`, or `None` to decline
    /// (treated as nothing selectable).
    fn choose(&mut self, selectable: &[Event]) -> Option<usize>;
}

/// Uniform choice from a seeded ChaCha stream; identical seeds replay
/// identical runs.
#[derive(Debug)]
pub struct SeededOracle {
    rng: ChaCha8Rng,
}

impl SeededOracle {
    /// Create an oracle from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl SelectionOracle for SeededOracle {
    fn choose(&mut self, selectable: &[Event]) -> Option<usize> {
        if selectable.is_empty() {
            None
        } else {
            Some(self.rng.gen_range(0..selectable.len()))
        }
    }
}

/// Strategy that delegates the choice among selectable events to an
/// oracle.
pub struct OracleBackedStrategy {
    oracle: Mutex<Box<dyn SelectionOracle>>,
}

impl OracleBackedStrategy {
    /// Wrap an oracle.
    pub fn new(oracle: impl SelectionOracle + 'static) -> Self {
        Self {
            oracle: Mutex::new(Box::new(oracle)),
        }
    }

    /// Deterministic-random strategy from a seed.
    pub fn seeded(seed: u64) -> Self {
        Self::new(SeededOracle::new(seed))
    }
}

impl EventSelectionStrategy for OracleBackedStrategy {
    fn select(&self, snapshot: &ProgramSnapshot) -> Result<Option<SelectionResult>, EngineError> {
        let candidates = selectable_candidates(snapshot)?;
        let events: Vec<Event> = candidates
            .iter()
            .map(|candidate| candidate.event.clone())
            .collect();
        let choice = lock_unpoisoned(&self.oracle).choose(&events);
        Ok(choice.and_then(|index| candidates.into_iter().nth(index)))
    }
}
