//! Runner lifecycle listeners
//!
//! Listeners observe a run: selection, superstep completion, b-thread
//! lifecycle, assertions, and termination. Callbacks for one superstep
//! fire in a fixed order: removals, resumptions/terminations, new
//! b-thread starts, then the snapshot emission.

use std::sync::{Arc, Mutex, RwLock};

use ensemble_core::Event;

use crate::program::lock_unpoisoned;
use crate::runner::ExitReason;
use crate::snapshot::ProgramSnapshot;

/// Observer for program lifecycle events. All methods default to no-ops.
pub trait RunnerListener: Send + Sync {
    /// The runner is about to start the program.
    fn started(&self, _program: &str) {}
    /// An event was selected for the coming superstep.
    fn event_selected(&self, _snapshot: &ProgramSnapshot, _event: &Event) {}
    /// A superstep completed and produced `snapshot`.
    fn superstep_done(&self, _snapshot: &ProgramSnapshot) {}
    /// A b-thread was registered.
    fn bthread_added(&self, _name: &str) {}
    /// A b-thread's body returned.
    fn bthread_done(&self, _name: &str) {}
    /// A b-thread was removed by an interrupting event.
    fn bthread_removed(&self, _name: &str) {}
    /// A body assertion failed; the run aborts after this callback.
    fn assertion_failed(&self, _bthread: &str, _message: &str) {}
    /// The run ended normally (including deadlock and abort exits).
    fn ended(&self, _reason: &ExitReason) {}
    /// The run was halted by a cycle-internal error.
    fn halted(&self, _reason: &str) {}
}

/// Registry fanning callbacks out to every registered listener, in
/// registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn RunnerListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn add(&self, listener: Arc<dyn RunnerListener>) {
        self.write().push(listener);
    }

    /// Remove a previously registered listener (pointer identity).
    pub fn remove(&self, listener: &Arc<dyn RunnerListener>) {
        self.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn RunnerListener>>> {
        self.listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<Arc<dyn RunnerListener>> {
        self.listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn started(&self, program: &str) {
        for listener in self.snapshot() {
            listener.started(program);
        }
    }

    pub(crate) fn event_selected(&self, snapshot: &ProgramSnapshot, event: &Event) {
        for listener in self.snapshot() {
            listener.event_selected(snapshot, event);
        }
    }

    pub(crate) fn superstep_done(&self, snapshot: &ProgramSnapshot) {
        for listener in self.snapshot() {
            listener.superstep_done(snapshot);
        }
    }

    pub(crate) fn bthread_added(&self, name: &str) {
        for listener in self.snapshot() {
            listener.bthread_added(name);
        }
    }

    pub(crate) fn bthread_done(&self, name: &str) {
        for listener in self.snapshot() {
            listener.bthread_done(name);
        }
    }

    pub(crate) fn bthread_removed(&self, name: &str) {
        for listener in self.snapshot() {
            listener.bthread_removed(name);
        }
    }

    pub(crate) fn assertion_failed(&self, bthread: &str, message: &str) {
        for listener in self.snapshot() {
            listener.assertion_failed(bthread, message);
        }
    }

    pub(crate) fn ended(&self, reason: &ExitReason) {
        for listener in self.snapshot() {
            listener.ended(reason);
        }
    }

    pub(crate) fn halted(&self, reason: &str) {
        for listener in self.snapshot() {
            listener.halted(reason);
        }
    }
}

/// Forwards every lifecycle callback into `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRunnerListener;

impl RunnerListener for TracingRunnerListener {
    fn started(&self, program: &str) {
        tracing::info!(program = %program, "program started");
    }

    fn event_selected(&self, _snapshot: &ProgramSnapshot, event: &Event) {
        tracing::info!(event = %event, "event selected");
    }

    fn superstep_done(&self, snapshot: &ProgramSnapshot) {
        tracing::debug!(
            live_bthreads = snapshot.bthreads().len(),
            queued_external = snapshot.external_events().len(),
            "superstep done"
        );
    }

    fn bthread_added(&self, name: &str) {
        tracing::debug!(bthread = %name, "b-thread added");
    }

    fn bthread_done(&self, name: &str) {
        tracing::debug!(bthread = %name, "b-thread done");
    }

    fn bthread_removed(&self, name: &str) {
        tracing::debug!(bthread = %name, "b-thread removed");
    }

    fn assertion_failed(&self, bthread: &str, message: &str) {
        tracing::error!(bthread = %bthread, message = %message, "assertion failed");
    }

    fn ended(&self, reason: &ExitReason) {
        tracing::info!(reason = ?reason, "program ended");
    }

    fn halted(&self, reason: &str) {
        tracing::error!(reason = %reason, "program halted");
    }
}

/// Captures the selected-event trace and lifecycle notes. The main test
/// and tooling hook for asserting on whole runs.
#[derive(Default)]
pub struct RecordingListener {
    selected: Mutex<Vec<Event>>,
    notes: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events selected so far, in order.
    pub fn selected_events(&self) -> Vec<Event> {
        lock_unpoisoned(&self.selected).clone()
    }

    /// Selected event names, in order.
    pub fn selected_names(&self) -> Vec<String> {
        lock_unpoisoned(&self.selected)
            .iter()
            .map(|event| event.name().to_string())
            .collect()
    }

    /// Lifecycle notes (`added:<name>`, `done:<name>`, `removed:<name>`,
    /// `assertion:<name>`, `ended:<reason>`, `halted:<reason>`), in order.
    pub fn notes(&self) -> Vec<String> {
        lock_unpoisoned(&self.notes).clone()
    }

    fn note(&self, note: String) {
        lock_unpoisoned(&self.notes).push(note);
    }
}

impl RunnerListener for RecordingListener {
    fn started(&self, program: &str) {
        self.note(format!("started:{program}"));
    }

    fn event_selected(&self, _snapshot: &ProgramSnapshot, event: &Event) {
        lock_unpoisoned(&self.selected).push(event.clone());
    }

    fn bthread_added(&self, name: &str) {
        self.note(format!("added:{name}"));
    }

    fn bthread_done(&self, name: &str) {
        self.note(format!("done:{name}"));
    }

    fn bthread_removed(&self, name: &str) {
        self.note(format!("removed:{name}"));
    }

    fn assertion_failed(&self, bthread: &str, _message: &str) {
        self.note(format!("assertion:{bthread}"));
    }

    fn ended(&self, reason: &ExitReason) {
        self.note(format!("ended:{reason:?}"));
    }

    fn halted(&self, reason: &str) {
        self.note(format!("halted:{reason}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_add_and_remove_by_identity() {
        let registry = ListenerRegistry::new();
        let recording = Arc::new(RecordingListener::new());
        let as_listener: Arc<dyn RunnerListener> = recording.clone();

        registry.add(as_listener.clone());
        registry.bthread_added("worker");
        assert_eq!(recording.notes(), vec!["added:worker".to_string()]);

        registry.remove(&as_listener);
        registry.bthread_added("other");
        assert_eq!(recording.notes(), vec!["added:worker".to_string()]);
    }

    #[test]
    fn test_registry_fans_out_to_all_listeners() {
        let registry = ListenerRegistry::new();
        let first = Arc::new(RecordingListener::new());
        let second = Arc::new(RecordingListener::new());
        registry.add(first.clone());
        registry.add(second.clone());

        registry.started("demo");
        registry.bthread_done("worker");

        let expected = vec!["started:demo".to_string(), "done:worker".to_string()];
        assert_eq!(first.notes(), expected);
        assert_eq!(second.notes(), expected);
    }
}
