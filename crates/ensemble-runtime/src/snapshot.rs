//! Program snapshots and the cycle arbiter
//!
//! A `ProgramSnapshot` is the state of a b-program with every b-thread
//! parked at a synchronization point. Advancing a snapshot with a selected
//! event runs one superstep: handle interrupts, resume the matching
//! b-threads, start whatever they registered, drain the external queue,
//! and assemble the next snapshot. Snapshots advance at most once.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ensemble_core::{Event, StatementError, SyncStatement};

use crate::bthread::{
    spawn_body, BThreadScope, BThreadSyncSnapshot, BreakUponHandler, InFlightStep, StepOutcome,
};
use crate::context::{BThreadContext, BodyError};
use crate::error::EngineError;
use crate::listeners::ListenerRegistry;
use crate::program::ProgramShared;
use crate::selection::SelectionResult;

/// How two snapshots are compared for state-space deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquivalenceMode {
    /// B-threads and the external queue must match (default).
    WithQueue,
    /// Compare b-threads only; exploration layers that branch over the
    /// queue separately use this.
    IgnoringQueue,
}

/// ProgramSnapshot - the immutable state of a program at a cycle boundary
pub struct ProgramSnapshot {
    shared: Arc<ProgramShared>,
    bthreads: Vec<BThreadSyncSnapshot>,
    external_events: VecDeque<Event>,
    daemon: bool,
    triggered: AtomicBool,
}

impl ProgramSnapshot {
    fn assemble(
        shared: Arc<ProgramShared>,
        mut bthreads: Vec<BThreadSyncSnapshot>,
        external_events: VecDeque<Event>,
    ) -> Self {
        bthreads.sort_by_key(BThreadSyncSnapshot::registration_index);
        let daemon = shared.is_daemon();
        Self {
            shared,
            bthreads,
            external_events,
            daemon,
            triggered: AtomicBool::new(false),
        }
    }

    /// Start every registered b-thread to its first synchronization point.
    pub(crate) async fn assemble_initial(
        shared: Arc<ProgramShared>,
        listeners: &ListenerRegistry,
    ) -> Result<Self, EngineError> {
        let mut next_round = Vec::new();
        start_pending(&shared, listeners, &mut next_round).await?;

        let mut external_events = VecDeque::new();
        external_events.extend(shared.drain_external());
        Ok(Self::assemble(shared, next_round, external_events))
    }

    /// Live b-threads, in registration order.
    pub fn bthreads(&self) -> &[BThreadSyncSnapshot] {
        &self.bthreads
    }

    /// Statements of the live b-threads, in registration order.
    pub fn statements(&self) -> impl Iterator<Item = &SyncStatement> {
        self.bthreads.iter().map(BThreadSyncSnapshot::statement)
    }

    /// The external event queue captured at the cycle boundary.
    pub fn external_events(&self) -> &VecDeque<Event> {
        &self.external_events
    }

    /// Daemon mode at the time this snapshot was assembled.
    pub fn daemon(&self) -> bool {
        self.daemon
    }

    /// Does the program have any b-threads left to run? If not, it has
    /// terminated.
    pub fn no_bthreads_left(&self) -> bool {
        self.bthreads.is_empty()
    }

    /// Advance one superstep with `event` selected.
    ///
    /// Fails with [`EngineError::SnapshotReused`] if this snapshot was
    /// already advanced; the program state is unaffected in that case.
    pub async fn trigger_event(&self, event: Event) -> Result<ProgramSnapshot, EngineError> {
        self.trigger_selection(&SelectionResult::internal(event), &ListenerRegistry::new())
            .await
    }

    /// Advance one superstep with a full selection result, delivering
    /// lifecycle callbacks to `listeners`. When the selection consumed an
    /// external event, that entry is dropped from the next queue.
    pub async fn trigger_selection(
        &self,
        selection: &SelectionResult,
        listeners: &ListenerRegistry,
    ) -> Result<ProgramSnapshot, EngineError> {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return Err(EngineError::SnapshotReused);
        }
        let event = &selection.event;
        tracing::debug!(program = %self.shared.name(), event = %event, "superstep started");

        let mut next_external = self.external_events.clone();
        if let Some(index) = selection.external_index {
            next_external.remove(index);
        }

        // Interrupted b-threads are removed before partitioning; their
        // break-upon handlers run with suspension forbidden.
        let mut survivors = Vec::new();
        for bt in &self.bthreads {
            if bt.statement().interrupt.contains(event)? {
                tracing::debug!(bthread = %bt.name(), event = %event, "b-thread interrupted");
                listeners.bthread_removed(bt.name());
                bt.discard_continuation();
                if let Some(handler) = bt.break_upon() {
                    run_break_upon(bt, handler.clone(), event, &self.shared).await?;
                }
            } else {
                survivors.push(bt);
            }
        }

        // Split the remaining b-threads into those the event wakes and
        // those that sleep through this cycle.
        let mut resuming = Vec::new();
        let mut sleeping = Vec::new();
        for bt in survivors {
            if bt.statement().should_wake_for(event)? {
                resuming.push(bt);
            } else {
                sleeping.push(bt);
            }
        }

        // Resume one b-thread at a time, in registration order: a body's
        // side effects (registrations, external enqueues, scope writes)
        // land before the next body wakes, so the cycle is deterministic
        // on every runtime flavor.
        let mut next_round = Vec::new();
        for bt in resuming {
            let step = bt
                .dispatch_resume(event.clone())
                .map_err(|err| EngineError::BodyFailure {
                    bthread: bt.name().to_string(),
                    message: err.to_string(),
                })?;
            collect_step(
                bt.name(),
                bt.registration_index(),
                bt.scope().clone(),
                step,
                listeners,
                &mut next_round,
            )
            .await?;
        }

        // B-threads registered while resuming start now, transitively;
        // they sleep with respect to the already-chosen event.
        start_pending(&self.shared, listeners, &mut next_round).await?;

        for bt in sleeping {
            next_round.push(bt.carry_over());
        }

        next_external.extend(self.shared.drain_external());
        tracing::debug!(
            program = %self.shared.name(),
            event = %event,
            live_bthreads = next_round.len(),
            queued_external = next_external.len(),
            "superstep completed"
        );
        Ok(Self::assemble(
            self.shared.clone(),
            next_round,
            next_external,
        ))
    }

    /// Fold externally enqueued events into this snapshot, consuming it.
    /// Used by daemon-mode waits between supersteps.
    pub(crate) fn with_additional_external(&self, events: Vec<Event>) -> ProgramSnapshot {
        self.triggered.store(true, Ordering::SeqCst);
        let mut external_events = self.external_events.clone();
        external_events.extend(events);
        let bthreads = self
            .bthreads
            .iter()
            .map(BThreadSyncSnapshot::carry_over)
            .collect();
        Self::assemble(self.shared.clone(), bthreads, external_events)
    }

    /// Structural comparison for state-space deduplication.
    ///
    /// B-threads compare by (name, statement); continuations and scopes
    /// stay out of the comparison.
    pub fn equivalent_to(&self, other: &ProgramSnapshot, mode: EquivalenceMode) -> bool {
        fn state_key(snapshot: &ProgramSnapshot) -> Vec<(&str, &SyncStatement)> {
            let mut key: Vec<_> = snapshot
                .bthreads
                .iter()
                .map(|bt| (bt.name(), bt.statement()))
                .collect();
            key.sort_by(|a, b| a.0.cmp(b.0));
            key
        }

        if state_key(self) != state_key(other) {
            return false;
        }
        match mode {
            EquivalenceMode::WithQueue => self.external_events == other.external_events,
            EquivalenceMode::IgnoringQueue => true,
        }
    }

}

impl fmt::Debug for ProgramSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramSnapshot")
            .field("bthreads", &self.bthreads)
            .field("external_events", &self.external_events)
            .field("daemon", &self.daemon)
            .finish()
    }
}

fn invalid_statement(bthread: &str, err: StatementError) -> EngineError {
    match err {
        StatementError::Predicate(predicate) => EngineError::Predicate(predicate),
        other => EngineError::InvalidStatement {
            bthread: bthread.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Wait for a dispatched step and fold the outcome into the next round.
async fn collect_step(
    name: &str,
    registration_index: u64,
    scope: BThreadScope,
    step: InFlightStep,
    listeners: &ListenerRegistry,
    next_round: &mut Vec<BThreadSyncSnapshot>,
) -> Result<(), EngineError> {
    match step.outcome().await {
        StepOutcome::Suspended {
            statement,
            break_upon,
            continuation,
        } => {
            statement
                .validate()
                .map_err(|err| invalid_statement(name, err))?;
            next_round.push(BThreadSyncSnapshot::suspended(
                name.to_string(),
                registration_index,
                scope,
                statement,
                break_upon,
                continuation,
            ));
            Ok(())
        }
        StepOutcome::Terminated => {
            tracing::debug!(bthread = %name, "b-thread done");
            listeners.bthread_done(name);
            Ok(())
        }
        StepOutcome::Failed(BodyError::Assertion(message)) => {
            listeners.assertion_failed(name, &message);
            Err(EngineError::AssertionFailed {
                bthread: name.to_string(),
                message,
            })
        }
        StepOutcome::Failed(err) => Err(EngineError::BodyFailure {
            bthread: name.to_string(),
            message: err.to_string(),
        }),
    }
}

/// Start newly registered b-threads until no more are registered.
/// Starting order is discovery order, which keeps registration indices
/// and waking ties deterministic.
async fn start_pending(
    shared: &Arc<ProgramShared>,
    listeners: &ListenerRegistry,
    next_round: &mut Vec<BThreadSyncSnapshot>,
) -> Result<(), EngineError> {
    loop {
        let pending = shared.drain_pending();
        if pending.is_empty() {
            return Ok(());
        }
        for bt in pending {
            tracing::debug!(bthread = %bt.name, "starting b-thread");
            listeners.bthread_added(&bt.name);
            let (scope, step) = spawn_body(bt.name.clone(), shared.clone(), bt.body);
            collect_step(
                &bt.name,
                bt.registration_index,
                scope,
                step,
                listeners,
                next_round,
            )
            .await?;
        }
    }
}

/// Run a break-upon handler with suspension forbidden.
async fn run_break_upon(
    bt: &BThreadSyncSnapshot,
    handler: BreakUponHandler,
    event: &Event,
    shared: &Arc<ProgramShared>,
) -> Result<(), EngineError> {
    let violation = Arc::new(AtomicBool::new(false));
    let ctx = BThreadContext::for_break_upon(
        bt.name().to_string(),
        shared.clone(),
        bt.scope().clone(),
        violation.clone(),
    );
    let result = handler(ctx, event.clone()).await;

    if violation.load(Ordering::SeqCst) {
        return Err(EngineError::BreakUponMisuse {
            bthread: bt.name().to_string(),
        });
    }
    match result {
        Ok(()) => Ok(()),
        Err(BodyError::SuspensionForbidden) => Err(EngineError::BreakUponMisuse {
            bthread: bt.name().to_string(),
        }),
        Err(err) => Err(EngineError::BodyFailure {
            bthread: bt.name().to_string(),
            message: format!("break-upon handler failed: {err}"),
        }),
    }
}
