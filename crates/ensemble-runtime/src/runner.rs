//! Program runner
//!
//! Drives a program start-to-end: start every b-thread, then repeatedly
//! select an event and advance one superstep until nothing remains to do.
//! Termination, deadlock, and external aborts are distinct exit reasons;
//! cycle-internal errors halt the run.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::listeners::{ListenerRegistry, RunnerListener};
use crate::program::Program;
use crate::selection::{EventSelectionStrategy, FirstRequestedStrategy};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// No b-threads left, or nothing selectable with no one waiting.
    Normal,
    /// Nothing selectable while b-threads still wait, in non-daemon mode.
    Deadlock,
    /// The stop signal fired; honored at cycle boundaries only.
    Aborted,
}

/// Runner - top-level loop for one program run
pub struct Runner {
    program: Program,
    strategy: Arc<dyn EventSelectionStrategy>,
    listeners: Arc<ListenerRegistry>,
    cancel: CancellationToken,
    cycle_timeout: Option<Duration>,
}

impl Runner {
    /// Create a runner with the deterministic priority strategy.
    pub fn new(program: Program) -> Self {
        let cycle_timeout = program
            .config()
            .cycle_timeout_ms
            .map(Duration::from_millis);
        Self {
            program,
            strategy: Arc::new(FirstRequestedStrategy),
            listeners: Arc::new(ListenerRegistry::new()),
            cancel: CancellationToken::new(),
            cycle_timeout,
        }
    }

    /// Replace the event selection strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn EventSelectionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// The program this runner drives.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Register a lifecycle listener.
    pub fn add_listener(&self, listener: Arc<dyn RunnerListener>) {
        self.listeners.add(listener);
    }

    /// Remove a previously registered listener.
    pub fn remove_listener(&self, listener: &Arc<dyn RunnerListener>) {
        self.listeners.remove(listener);
    }

    /// Token that stops the run at the next cycle boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the program to completion.
    pub async fn run(&self) -> Result<ExitReason, EngineError> {
        let result = self.run_to_completion().await;
        match &result {
            Ok(reason) => {
                tracing::info!(program = %self.program.name(), reason = ?reason, "run ended");
                self.listeners.ended(reason);
            }
            Err(err) => {
                tracing::error!(program = %self.program.name(), error = %err, "run halted");
                self.listeners.halted(&err.to_string());
            }
        }
        result
    }

    async fn run_to_completion(&self) -> Result<ExitReason, EngineError> {
        self.listeners.started(self.program.name());
        let mut snapshot = self
            .bounded(self.program.start_with_listeners(&self.listeners))
            .await?;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(ExitReason::Aborted);
            }
            if snapshot.no_bthreads_left() {
                return Ok(ExitReason::Normal);
            }

            match self.strategy.select(&snapshot)? {
                Some(selection) => {
                    self.listeners.event_selected(&snapshot, &selection.event);
                    snapshot = self
                        .bounded(snapshot.trigger_selection(&selection, &self.listeners))
                        .await?;
                    self.listeners.superstep_done(&snapshot);
                }
                None if !snapshot.daemon() => {
                    // Deadlock only when someone can still be woken;
                    // leftover pure blockers end the program normally.
                    let waiting = snapshot.statements().any(|statement| !statement.is_inert());
                    return Ok(if waiting {
                        ExitReason::Deadlock
                    } else {
                        ExitReason::Normal
                    });
                }
                None => {
                    // Daemon mode: park until an external event arrives,
                    // then fold the queue into the current snapshot.
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(ExitReason::Aborted),
                        _ = self.program.shared().wait_for_external() => {
                            let drained = self.program.shared().drain_external();
                            snapshot = snapshot.with_additional_external(drained);
                        }
                    }
                }
            }
        }
    }

    async fn bounded<T>(
        &self,
        step: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        match self.cycle_timeout {
            Some(budget) => match tokio::time::timeout(budget, step).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::CycleTimeout {
                    budget_ms: budget.as_millis() as u64,
                }),
            },
            None => step.await,
        }
    }
}
