//! B-thread host interface
//!
//! `BThreadContext` is the surface a body sees: the `sync` suspension
//! primitive plus event construction helpers, dynamic registration,
//! external enqueue, daemon control, wall-clock time, the seeded random
//! source, and the weakly-typed scopes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use ensemble_core::{Event, SyncStatement};

use crate::bthread::{BThreadReport, BThreadScope, BreakUponHandler};
use crate::program::ProgramShared;

/// Error a b-thread body can produce
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BodyError {
    /// The b-thread was interrupted while suspended; the body unwinds
    /// quietly and must not synchronize again.
    #[error("b-thread was interrupted")]
    Interrupted,

    /// `sync` was called where suspension is not allowed
    /// (inside a break-upon handler).
    #[error("synchronization is not allowed in this context")]
    SuspensionForbidden,

    /// A body assertion did not hold.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// Any other body failure.
    #[error("{0}")]
    Failure(String),
}

impl From<String> for BodyError {
    fn from(message: String) -> Self {
        Self::Failure(message)
    }
}

impl From<&str> for BodyError {
    fn from(message: &str) -> Self {
        Self::Failure(message.to_string())
    }
}

/// Boxed future a b-thread body runs to completion
pub type BodyFuture = BoxFuture<'static, Result<(), BodyError>>;

/// Boxed b-thread body: consumes its context, runs until it returns
pub(crate) type BoxBody = Box<dyn FnOnce(BThreadContext) -> BodyFuture + Send + 'static>;

/// Box a generic body closure
pub(crate) fn box_body<F, Fut>(body: F) -> BoxBody
where
    F: FnOnce(BThreadContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), BodyError>> + Send + 'static,
{
    Box::new(move |ctx| Box::pin(body(ctx)))
}

// Whether the context may suspend. Break-upon handlers get a forbidding
// context; the violation flag lets the arbiter detect an attempted sync
// even when the handler swallows the returned error.
#[derive(Clone)]
enum SuspensionPolicy {
    Allowed,
    Forbidden { violation: Arc<AtomicBool> },
}

/// The host interface handed to every b-thread body.
///
/// Cheap to clone; all methods other than [`sync`](Self::sync) return
/// without suspending.
#[derive(Clone)]
pub struct BThreadContext {
    name: String,
    shared: Arc<ProgramShared>,
    scope: BThreadScope,
    report_tx: mpsc::UnboundedSender<BThreadReport>,
    suspension: SuspensionPolicy,
}

impl BThreadContext {
    pub(crate) fn new(
        name: String,
        shared: Arc<ProgramShared>,
        scope: BThreadScope,
        report_tx: mpsc::UnboundedSender<BThreadReport>,
    ) -> Self {
        Self {
            name,
            shared,
            scope,
            report_tx,
            suspension: SuspensionPolicy::Allowed,
        }
    }

    /// Context for a break-upon handler: same facilities, suspension
    /// forbidden. The handler has no live continuation, so the report
    /// channel is a stub that is never written to.
    pub(crate) fn for_break_upon(
        name: String,
        shared: Arc<ProgramShared>,
        scope: BThreadScope,
        violation: Arc<AtomicBool>,
    ) -> Self {
        let (report_tx, _) = mpsc::unbounded_channel();
        Self {
            name,
            shared,
            scope,
            report_tx,
            suspension: SuspensionPolicy::Forbidden { violation },
        }
    }

    /// Name of this b-thread
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Synchronize: publish `statement` and suspend until the arbiter
    /// resumes this b-thread with the selected event.
    ///
    /// The returned event matches the statement's request or wait-for set.
    /// If the b-thread is interrupted while suspended, the call fails with
    /// [`BodyError::Interrupted`] and the body must unwind.
    pub async fn sync(&self, statement: SyncStatement) -> Result<Event, BodyError> {
        self.sync_inner(statement, None).await
    }

    /// Synchronize with a break-upon handler attached.
    ///
    /// If an event in the statement's interrupt set is selected, the body
    /// never resumes; `handler` runs instead, in a context where
    /// synchronization is forbidden.
    pub async fn sync_with_break_upon(
        &self,
        statement: SyncStatement,
        handler: BreakUponHandler,
    ) -> Result<Event, BodyError> {
        self.sync_inner(statement, Some(handler)).await
    }

    async fn sync_inner(
        &self,
        statement: SyncStatement,
        break_upon: Option<BreakUponHandler>,
    ) -> Result<Event, BodyError> {
        if let SuspensionPolicy::Forbidden { violation } = &self.suspension {
            violation.store(true, Ordering::SeqCst);
            return Err(BodyError::SuspensionForbidden);
        }

        let (resume_tx, resume_rx) = oneshot::channel();
        self.report_tx
            .send(BThreadReport::Synced {
                statement,
                break_upon,
                resume: resume_tx,
            })
            .map_err(|_| BodyError::Interrupted)?;
        resume_rx.await.map_err(|_| BodyError::Interrupted)
    }

    /// Register another b-thread; it starts during the current cycle and
    /// first participates in the next one.
    pub fn register_bthread<F, Fut>(&self, name: impl Into<String>, body: F)
    where
        F: FnOnce(BThreadContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BodyError>> + Send + 'static,
    {
        self.shared.register_bthread(name.into(), box_body(body));
    }

    /// Register a b-thread under an auto-generated `autoadded-<n>` name.
    pub fn register_bthread_auto<F, Fut>(&self, body: F) -> String
    where
        F: FnOnce(BThreadContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BodyError>> + Send + 'static,
    {
        self.shared.register_bthread_auto(box_body(body))
    }

    /// Append an event to the external queue. Visible to the selection
    /// strategy at the next cycle boundary.
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

    /// Milliseconds since the Unix epoch.
    pub fn time_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Next value from the program-owned seeded random stream.
    pub fn random_u64(&self) -> u64 {
        self.shared.random_u64()
    }

    /// Uniform value in `[0, 1)` from the seeded random stream.
    pub fn random_f64(&self) -> f64 {
        self.shared.random_f64()
    }

    /// Uniform index in `[0, len)` from the seeded random stream.
    /// Returns `None` for an empty range.
    pub fn random_index(&self, len: usize) -> Option<usize> {
        self.shared.random_index(len)
    }

    /// Store a value in the program-wide global scope.
    pub fn put_global(&self, key: impl Into<String>, value: Value) {
        self.shared.global_scope().put(key, value);
    }

    /// Read a typed value from the program-wide global scope.
    pub fn get_global<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.shared.global_scope().get(key)
    }

    /// Store a value in this b-thread's private scope.
    pub fn put_local(&self, key: impl Into<String>, value: Value) {
        self.scope.put(key, value);
    }

    /// Read a value from this b-thread's private scope.
    pub fn get_local(&self, key: &str) -> Option<Value> {
        self.scope.get(key)
    }

    /// Fail the b-thread (and the whole run) when `condition` is false.
    pub fn assert_true(&self, condition: bool, message: impl Into<String>) -> Result<(), BodyError> {
        if condition {
            Ok(())
        } else {
            Err(BodyError::Assertion(message.into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;
    use serde_json::json;

    fn test_context() -> (BThreadContext, mpsc::UnboundedReceiver<BThreadReport>) {
        let program = Program::new("ctx-test");
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let ctx = BThreadContext::new(
            "probe".to_string(),
            program.shared().clone(),
            BThreadScope::default(),
            report_tx,
        );
        (ctx, report_rx)
    }

    #[test]
    fn test_assert_true_passes_and_fails() {
        let (ctx, _rx) = test_context();
        ctx.assert_true(true, "fine").expect("holds");
        let err = ctx.assert_true(false, "broken").expect_err("fails");
        assert_eq!(err, BodyError::Assertion("broken".to_string()));
    }

    #[test]
    fn test_scopes_are_independent() {
        let (ctx, _rx) = test_context();
        ctx.put_global("shared", json!(1));
        ctx.put_local("mine", json!(2));

        assert_eq!(ctx.get_global::<i64>("shared"), Some(1));
        assert_eq!(ctx.get_local("mine"), Some(json!(2)));
        assert_eq!(ctx.get_local("shared"), None);
        assert_eq!(ctx.get_global::<i64>("mine"), None);
    }

    #[tokio::test]
    async fn test_sync_forbidden_in_break_upon_context() {
        let program = Program::new("ctx-test");
        let violation = Arc::new(AtomicBool::new(false));
        let ctx = BThreadContext::for_break_upon(
            "handler".to_string(),
            program.shared().clone(),
            BThreadScope::default(),
            violation.clone(),
        );

        let err = ctx
            .sync(SyncStatement::new().request(Event::named("x")))
            .await
            .expect_err("suspension must be rejected");
        assert_eq!(err, BodyError::SuspensionForbidden);
        assert!(violation.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_sync_publishes_statement_and_returns_resumed_event() {
        let (ctx, mut report_rx) = test_context();
        let statement = SyncStatement::new().request(Event::named("go"));

        let sync_task = tokio::spawn(async move { ctx.sync(statement).await });

        match report_rx.recv().await.expect("report") {
            BThreadReport::Synced {
                statement, resume, ..
            } => {
                assert_eq!(statement.request, vec![Event::named("go")]);
                resume.send(Event::named("go")).expect("resume");
            }
            other => panic!("unexpected report: {other:?}"),
        }

        let woke = sync_task.await.expect("join").expect("resumed");
        assert_eq!(woke, Event::named("go"));
    }
}
