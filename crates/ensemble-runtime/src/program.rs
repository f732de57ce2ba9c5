//! Program handle and shared per-program state
//!
//! Each program owns its resources: the pending-registration list, the
//! external event queue, the daemon flag, the auto-name counter, the
//! seeded random source, and the global scope. Nothing here is
//! process-wide, so independent programs can run concurrently.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Notify;

use ensemble_core::Event;

use crate::config::ProgramConfig;
use crate::context::{box_body, BThreadContext, BodyError, BoxBody};
use crate::error::EngineError;
use crate::listeners::ListenerRegistry;
use crate::snapshot::ProgramSnapshot;

// Locks here guard plain data and are held for a few instructions; a
// poisoning panic cannot leave the data invalid, so recover the guard.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A registered b-thread that has not started yet.
pub(crate) struct PendingBThread {
    pub(crate) name: String,
    pub(crate) registration_index: u64,
    pub(crate) body: BoxBody,
}

/// Program-wide global scope: a weakly-typed KV store bodies write and
/// hosts read back (the main test hook for body-produced values).
#[derive(Default)]
pub struct GlobalScope {
    data: Mutex<HashMap<String, Value>>,
}

impl GlobalScope {
    /// Store a value under `key`.
    pub fn put(&self, key: impl Into<String>, value: Value) {
        lock_unpoisoned(&self.data).insert(key.into(), value);
    }

    /// Read a typed value. Returns `None` when the key is missing or the
    /// stored value does not deserialize as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = lock_unpoisoned(&self.data).get(key).cloned()?;
        serde_json::from_value(value).ok()
    }

    /// Read the raw stored value.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        lock_unpoisoned(&self.data).get(key).cloned()
    }

    /// All stored keys.
    pub fn keys(&self) -> Vec<String> {
        lock_unpoisoned(&self.data).keys().cloned().collect()
    }
}

impl fmt::Debug for GlobalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalScope")
            .field("keys", &lock_unpoisoned(&self.data).len())
            .finish()
    }
}

/// Mutable state shared by the program handle, running bodies, and
/// snapshots. Append-only during a cycle; drained at cycle boundaries.
pub(crate) struct ProgramShared {
    name: String,
    daemon: AtomicBool,
    auto_name_counter: AtomicU64,
    next_registration_index: AtomicU64,
    pending: Mutex<Vec<PendingBThread>>,
    external_events: Mutex<VecDeque<Event>>,
    external_notify: Notify,
    global_scope: GlobalScope,
    rng: Mutex<ChaCha8Rng>,
}

impl ProgramShared {
    fn new(config: &ProgramConfig) -> Self {
        Self {
            name: config.name.clone(),
            daemon: AtomicBool::new(config.daemon),
            auto_name_counter: AtomicU64::new(0),
            next_registration_index: AtomicU64::new(0),
            pending: Mutex::new(Vec::new()),
            external_events: Mutex::new(VecDeque::new()),
            external_notify: Notify::new(),
            global_scope: GlobalScope::default(),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(config.random_seed)),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn register_bthread(&self, name: String, body: BoxBody) {
        let registration_index = self.next_registration_index.fetch_add(1, Ordering::SeqCst);
        lock_unpoisoned(&self.pending).push(PendingBThread {
            name,
            registration_index,
            body,
        });
    }

    pub(crate) fn register_bthread_auto(&self, body: BoxBody) -> String {
        let n = self.auto_name_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!("autoadded-{n}");
        self.register_bthread(name.clone(), body);
        name
    }

    /// Registrations made since the last drain, in discovery order.
    pub(crate) fn drain_pending(&self) -> Vec<PendingBThread> {
        std::mem::take(&mut *lock_unpoisoned(&self.pending))
    }

    pub(crate) fn enqueue_external(&self, event: Event) {
        lock_unpoisoned(&self.external_events).push_back(event);
        self.external_notify.notify_one();
    }

    /// External events accumulated since the last drain, FIFO.
    pub(crate) fn drain_external(&self) -> Vec<Event> {
        lock_unpoisoned(&self.external_events).drain(..).collect()
    }

    /// Park until the external queue is non-empty.
    pub(crate) async fn wait_for_external(&self) {
        loop {
            let notified = self.external_notify.notified();
            if !lock_unpoisoned(&self.external_events).is_empty() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn set_daemon(&self, daemon: bool) {
        self.daemon.store(daemon, Ordering::SeqCst);
    }

    pub(crate) fn is_daemon(&self) -> bool {
        self.daemon.load(Ordering::SeqCst)
    }

    pub(crate) fn global_scope(&self) -> &GlobalScope {
        &self.global_scope
    }

    pub(crate) fn random_u64(&self) -> u64 {
        lock_unpoisoned(&self.rng).gen()
    }

    pub(crate) fn random_f64(&self) -> f64 {
        lock_unpoisoned(&self.rng).gen_range(0.0..1.0)
    }

    pub(crate) fn random_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(lock_unpoisoned(&self.rng).gen_range(0..len))
    }
}

/// Program - the host-facing handle for one b-program
///
/// Cheap to clone; clones share the same program state, so a clone can
/// keep enqueuing external events while the runner drives the original.
#[derive(Clone)]
pub struct Program {
    shared: Arc<ProgramShared>,
    config: ProgramConfig,
}

impl Program {
    /// Create a program with default configuration under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(ProgramConfig::named(name))
    }

    /// Create a program from a full configuration.
    pub fn with_config(config: ProgramConfig) -> Self {
        Self {
            shared: Arc::new(ProgramShared::new(&config)),
            config,
        }
    }

    /// Program name.
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// The configuration this program was built from.
    pub fn config(&self) -> &ProgramConfig {
        &self.config
    }

    pub(crate) fn shared(&self) -> &Arc<ProgramShared> {
        &self.shared
    }

    /// Register a b-thread. It starts when the current (or first) cycle
    /// drains registrations, and participates from the following cycle.
    pub fn register_bthread<F, Fut>(&self, name: impl Into<String>, body: F)
    where
        F: FnOnce(BThreadContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BodyError>> + Send + 'static,
    {
        self.shared.register_bthread(name.into(), box_body(body));
    }

    /// Register a b-thread under an auto-generated `autoadded-<n>` name;
    /// returns the generated name.
    pub fn register_bthread_auto<F, Fut>(&self, body: F) -> String
    where
        F: FnOnce(BThreadContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BodyError>> + Send + 'static,
    {
        self.shared.register_bthread_auto(box_body(body))
    }

    /// Thread-safe append to the external event queue.
    pub fn enqueue_external(&self, event: Event) {
        self.shared.enqueue_external(event);
    }

    /// Switch daemon mode on or off.
    pub fn set_daemon(&self, daemon: bool) {
        self.shared.set_daemon(daemon);
    }

    /// Current daemon mode.
    pub fn is_daemon(&self) -> bool {
        self.shared.is_daemon()
    }

    /// The program-wide global scope.
    pub fn global_scope(&self) -> &GlobalScope {
        self.shared.global_scope()
    }

    /// Run every registered b-thread to its first synchronization point
    /// and return the initial snapshot.
    pub async fn start(&self) -> Result<ProgramSnapshot, EngineError> {
        self.start_with_listeners(&ListenerRegistry::new()).await
    }

    /// [`start`](Self::start), with lifecycle callbacks delivered to
    /// `listeners`.
    pub async fn start_with_listeners(
        &self,
        listeners: &ListenerRegistry,
    ) -> Result<ProgramSnapshot, EngineError> {
        ProgramSnapshot::assemble_initial(self.shared.clone(), listeners).await
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name())
            .field("daemon", &self.is_daemon())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auto_names_are_sequential_per_program() {
        let program = Program::new("auto");
        let a = program.register_bthread_auto(|_bp| async { Ok(()) });
        let b = program.register_bthread_auto(|_bp| async { Ok(()) });
        assert_eq!(a, "autoadded-1");
        assert_eq!(b, "autoadded-2");

        let other = Program::new("other");
        let c = other.register_bthread_auto(|_bp| async { Ok(()) });
        assert_eq!(c, "autoadded-1");
    }

    #[test]
    fn test_external_queue_preserves_fifo_order() {
        let program = Program::new("queue");
        program.enqueue_external(Event::named("first"));
        program.enqueue_external(Event::named("second"));

        let drained = program.shared().drain_external();
        assert_eq!(drained, vec![Event::named("first"), Event::named("second")]);
        assert!(program.shared().drain_external().is_empty());
    }

    #[test]
    fn test_global_scope_typed_reads() {
        let program = Program::new("scope");
        program.global_scope().put("count", json!(7));
        program.global_scope().put("label", json!("seven"));

        assert_eq!(program.global_scope().get::<i64>("count"), Some(7));
        assert_eq!(
            program.global_scope().get::<String>("label"),
            Some("seven".to_string())
        );
        // Type mismatch reads as absent.
        assert_eq!(program.global_scope().get::<i64>("label"), None);
        assert_eq!(program.global_scope().get::<i64>("missing"), None);
    }

    #[test]
    fn test_seeded_random_replays_identically() {
        let a = Program::with_config(ProgramConfig {
            random_seed: 99,
            ..ProgramConfig::named("rng-a")
        });
        let b = Program::with_config(ProgramConfig {
            random_seed: 99,
            ..ProgramConfig::named("rng-b")
        });

        let from_a: Vec<u64> = (0..8).map(|_| a.shared().random_u64()).collect();
        let from_b: Vec<u64> = (0..8).map(|_| b.shared().random_u64()).collect();
        assert_eq!(from_a, from_b);
    }

    #[test]
    fn test_wait_for_external_returns_once_enqueued() {
        tokio_test::block_on(async {
            let program = Program::new("daemon");
            let shared = program.shared().clone();
            let waiter = tokio::spawn(async move { shared.wait_for_external().await });

            tokio::task::yield_now().await;
            program.enqueue_external(Event::named("wake"));
            waiter.await.expect("waiter completes");
        });
    }
}
