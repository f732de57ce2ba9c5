//! B-thread snapshots and continuations
//!
//! Every b-thread body runs on its own task. Suspension is a channel
//! handshake: the body reports its sync statement together with a fresh
//! resume channel, then parks until the arbiter delivers the selected
//! event. The "continuation" a snapshot owns is exactly that pair of
//! channel ends, consumed once per advance.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use ensemble_core::{Event, SyncStatement};

use crate::context::{BThreadContext, BodyError, BoxBody};
use crate::program::{lock_unpoisoned, ProgramShared};

/// Handler invoked when an interrupting event removes a b-thread.
/// Runs in a context where synchronization is forbidden.
pub type BreakUponHandler =
    Arc<dyn Fn(BThreadContext, Event) -> BoxFuture<'static, Result<(), BodyError>> + Send + Sync>;

/// Build a [`BreakUponHandler`] from an async closure.
pub fn break_upon<F, Fut>(handler: F) -> BreakUponHandler
where
    F: Fn(BThreadContext, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BodyError>> + Send + 'static,
{
    Arc::new(move |ctx, event| Box::pin(handler(ctx, event)))
}

/// Per-b-thread private scope: a weakly-typed KV store shared between the
/// running body and the snapshots that describe it.
#[derive(Clone, Default)]
pub struct BThreadScope {
    data: Arc<Mutex<HashMap<String, Value>>>,
}

impl BThreadScope {
    /// Store a value under `key`.
    pub fn put(&self, key: impl Into<String>, value: Value) {
        lock_unpoisoned(&self.data).insert(key.into(), value);
    }

    /// Read a value by `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        lock_unpoisoned(&self.data).get(key).cloned()
    }

    /// All stored bindings, cloned.
    pub fn bindings(&self) -> HashMap<String, Value> {
        lock_unpoisoned(&self.data).clone()
    }
}

impl fmt::Debug for BThreadScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BThreadScope")
            .field("keys", &lock_unpoisoned(&self.data).len())
            .finish()
    }
}

/// What a body reports back to the arbiter at each step boundary.
pub(crate) enum BThreadReport {
    /// The body suspended at `sync` with this statement.
    Synced {
        statement: SyncStatement,
        break_upon: Option<BreakUponHandler>,
        resume: oneshot::Sender<Event>,
    },
    /// The body returned normally.
    Done,
    /// The body returned an error.
    Failed(BodyError),
}

impl fmt::Debug for BThreadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synced { statement, .. } => {
                f.debug_struct("Synced").field("statement", statement).finish()
            }
            Self::Done => write!(f, "Done"),
            Self::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

/// The resumable half of a suspended b-thread. Consumed exactly once.
pub(crate) struct Continuation {
    resume: oneshot::Sender<Event>,
    reports: mpsc::UnboundedReceiver<BThreadReport>,
}

/// A dispatched step: the event is on its way to the body; the next
/// report is still pending.
pub(crate) struct InFlightStep {
    reports: mpsc::UnboundedReceiver<BThreadReport>,
}

impl InFlightStep {
    /// Await the body's next report.
    pub(crate) async fn outcome(mut self) -> StepOutcome {
        match self.reports.recv().await {
            Some(BThreadReport::Synced {
                statement,
                break_upon,
                resume,
            }) => StepOutcome::Suspended {
                statement,
                break_upon,
                continuation: Continuation {
                    resume,
                    reports: self.reports,
                },
            },
            Some(BThreadReport::Done) => StepOutcome::Terminated,
            Some(BThreadReport::Failed(err)) => StepOutcome::Failed(err),
            // The task dropped both channel ends without reporting:
            // the body panicked.
            None => StepOutcome::Failed(BodyError::Failure(
                "b-thread body ended without reporting (panic?)".to_string(),
            )),
        }
    }
}

/// Result of advancing a b-thread by one step.
pub(crate) enum StepOutcome {
    Suspended {
        statement: SyncStatement,
        break_upon: Option<BreakUponHandler>,
        continuation: Continuation,
    },
    Terminated,
    Failed(BodyError),
}

/// Spawn a body task and return its scope plus the pending first step.
pub(crate) fn spawn_body(
    name: String,
    shared: Arc<ProgramShared>,
    body: BoxBody,
) -> (BThreadScope, InFlightStep) {
    let (report_tx, reports) = mpsc::unbounded_channel();
    let scope = BThreadScope::default();
    let ctx = BThreadContext::new(name, shared, scope.clone(), report_tx.clone());

    tokio::spawn(async move {
        match body(ctx).await {
            Ok(()) => {
                let _ = report_tx.send(BThreadReport::Done);
            }
            // Interruption unwinds the body quietly; the arbiter already
            // removed the b-thread and expects no report.
            Err(BodyError::Interrupted) => {}
            Err(err) => {
                let _ = report_tx.send(BThreadReport::Failed(err));
            }
        }
    });

    (scope, InFlightStep { reports })
}

/// BThreadSyncSnapshot - one suspended b-thread
///
/// Identity, current sync statement, private scope, optional break-upon
/// handler, and the one-shot continuation. Owned by the program snapshot
/// that contains it; advancing produces a fresh value.
pub struct BThreadSyncSnapshot {
    name: String,
    registration_index: u64,
    scope: BThreadScope,
    statement: SyncStatement,
    break_upon: Option<BreakUponHandler>,
    continuation: Mutex<Option<Continuation>>,
}

impl BThreadSyncSnapshot {
    pub(crate) fn suspended(
        name: String,
        registration_index: u64,
        scope: BThreadScope,
        statement: SyncStatement,
        break_upon: Option<BreakUponHandler>,
        continuation: Continuation,
    ) -> Self {
        Self {
            name,
            registration_index,
            scope,
            statement,
            break_upon,
            continuation: Mutex::new(Some(continuation)),
        }
    }

    /// Name of the b-thread
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program-wide registration index; ties in selection and waking
    /// order resolve by this
    pub fn registration_index(&self) -> u64 {
        self.registration_index
    }

    /// The statement published at the last synchronization point
    pub fn statement(&self) -> &SyncStatement {
        &self.statement
    }

    /// The b-thread's private scope
    pub fn scope(&self) -> &BThreadScope {
        &self.scope
    }

    pub(crate) fn break_upon(&self) -> Option<&BreakUponHandler> {
        self.break_upon.as_ref()
    }

    fn take_continuation(&self) -> Option<Continuation> {
        lock_unpoisoned(&self.continuation).take()
    }

    /// Deliver `event` to the parked body. The body starts running
    /// immediately; the returned step resolves at its next suspension.
    pub(crate) fn dispatch_resume(&self, event: Event) -> Result<InFlightStep, BodyError> {
        let continuation = self.take_continuation().ok_or_else(|| {
            BodyError::Failure("b-thread continuation was already consumed".to_string())
        })?;
        let Continuation { resume, reports } = continuation;
        resume
            .send(event)
            .map_err(|_| BodyError::Failure("b-thread task is gone".to_string()))?;
        Ok(InFlightStep { reports })
    }

    /// Drop the continuation without resuming: the parked body observes a
    /// closed channel and unwinds as interrupted.
    pub(crate) fn discard_continuation(&self) {
        drop(self.take_continuation());
    }

    /// Move this b-thread, continuation included, into the next snapshot.
    pub(crate) fn carry_over(&self) -> Self {
        Self {
            name: self.name.clone(),
            registration_index: self.registration_index,
            scope: self.scope.clone(),
            statement: self.statement.clone(),
            break_upon: self.break_upon.clone(),
            continuation: Mutex::new(self.take_continuation()),
        }
    }
}

impl fmt::Debug for BThreadSyncSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BThreadSyncSnapshot")
            .field("name", &self.name)
            .field("registration_index", &self.registration_index)
            .field("statement", &self.statement)
            .field("break_upon", &self.break_upon.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::box_body;
    use crate::program::Program;
    use ensemble_core::EventSet;

    fn start_probe(
        program: &Program,
        statement: SyncStatement,
    ) -> (BThreadScope, InFlightStep) {
        spawn_body(
            "probe".to_string(),
            program.shared().clone(),
            box_body(move |bp| async move {
                bp.sync(statement).await?;
                Ok(())
            }),
        )
    }

    #[tokio::test]
    async fn test_body_runs_to_first_suspension() {
        let program = Program::new("bt-test");
        let statement = SyncStatement::new().request(Event::named("go"));
        let (_scope, step) = start_probe(&program, statement.clone());

        match step.outcome().await {
            StepOutcome::Suspended {
                statement: published,
                ..
            } => assert_eq!(published, statement),
            _ => panic!("expected suspension"),
        }
    }

    #[tokio::test]
    async fn test_resume_then_terminate() {
        let program = Program::new("bt-test");
        let (_scope, step) = start_probe(
            &program,
            SyncStatement::new().wait_for(EventSet::singleton(Event::named("go"))),
        );

        let bt = match step.outcome().await {
            StepOutcome::Suspended {
                statement,
                break_upon,
                continuation,
            } => BThreadSyncSnapshot::suspended(
                "probe".to_string(),
                0,
                BThreadScope::default(),
                statement,
                break_upon,
                continuation,
            ),
            _ => panic!("expected suspension"),
        };

        let step = bt.dispatch_resume(Event::named("go")).expect("dispatch");
        assert!(matches!(step.outcome().await, StepOutcome::Terminated));
    }

    #[tokio::test]
    async fn test_discarded_continuation_unwinds_body_silently() {
        let program = Program::new("bt-test");
        let (scope, step) = spawn_body(
            "probe".to_string(),
            program.shared().clone(),
            box_body(|bp| async move {
                let result = bp.sync(SyncStatement::new().wait_for(EventSet::All)).await;
                bp.put_local("after_sync", serde_json::json!(format!("{result:?}")));
                result?;
                Ok(())
            }),
        );

        let bt = match step.outcome().await {
            StepOutcome::Suspended {
                statement,
                break_upon,
                continuation,
            } => BThreadSyncSnapshot::suspended(
                "probe".to_string(),
                0,
                scope.clone(),
                statement,
                break_upon,
                continuation,
            ),
            _ => panic!("expected suspension"),
        };

        bt.discard_continuation();
        // Give the body task a chance to observe the closed channel.
        tokio::task::yield_now().await;
        let seen = scope.get("after_sync").expect("body observed interruption");
        assert!(seen.as_str().expect("string").contains("Interrupted"));
    }

    #[tokio::test]
    async fn test_failing_body_reports_failure() {
        let program = Program::new("bt-test");
        let (_scope, step) = spawn_body(
            "probe".to_string(),
            program.shared().clone(),
            box_body(|_bp| async move { Err(BodyError::Failure("boom".to_string())) }),
        );

        match step.outcome().await {
            StepOutcome::Failed(BodyError::Failure(message)) => assert_eq!(message, "boom"),
            _ => panic!("expected failure"),
        }
    }
}
