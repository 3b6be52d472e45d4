//! Linear step runner with reverse-order cleanup.
//!
//! A [`Runner`] executes its steps one at a time against a shared state
//! value. When a step halts, or cancellation is observed between steps, the
//! runner stops early. Either way it then calls [`Step::cleanup`] on every
//! step that already ran (the halting step included) in reverse order, so
//! ephemeral resources are released after a successful run too. Cleanup
//! never stops the unwind.

mod error;
mod state;

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::ActionWaiter;
use crate::communicator::Communicator;
use crate::config::BuildConfig;
use crate::provider::CloudApi;
use crate::ui::Ui;

pub use error::BuildError;
pub use state::{BuildState, CleanupReport};

/// Boxed future returned by [`Step`] methods.
pub type StepFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a single step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepAction {
    /// Proceed with the next step.
    Continue,
    /// Stop and unwind.
    Halt,
}

/// Outcome of a full run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunStatus {
    /// Every step continued.
    Completed,
    /// The named step halted.
    Halted {
        /// Name of the halting step.
        step: &'static str,
    },
    /// Cancellation was observed before the next step started.
    Cancelled,
}

/// A named unit of work with a compensating cleanup.
pub trait Step<S>: Send {
    /// Short name used in logs and cleanup reports.
    fn name(&self) -> &'static str;

    /// Performs the step.
    fn run<'a>(&'a mut self, state: &'a mut S) -> StepFuture<'a, StepAction>;

    /// Undoes whatever [`Step::run`] created. Must not fail the unwind.
    fn cleanup<'a>(&'a mut self, _state: &'a mut S) -> StepFuture<'a, ()> {
        Box::pin(std::future::ready(()))
    }
}

/// Ordered list of steps.
pub struct Runner<S> {
    steps: Vec<Box<dyn Step<S>>>,
}

impl<S> Default for Runner<S> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<S: Send> Runner<S> {
    /// Creates an empty runner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step.
    #[must_use]
    pub fn step(mut self, step: impl Step<S> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Appends a step only when `condition` holds.
    #[must_use]
    pub fn step_if(self, condition: bool, step: impl Step<S> + 'static) -> Self {
        if condition { self.step(step) } else { self }
    }

    /// Names of the steps in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Runs the steps in order, then unwinds every executed step.
    pub async fn run(&mut self, state: &mut S, cancel: &CancellationToken) -> RunStatus {
        let mut executed = 0_usize;
        let mut status = RunStatus::Completed;

        for step in &mut self.steps {
            if cancel.is_cancelled() {
                warn!(step = step.name(), "cancelled before step");
                status = RunStatus::Cancelled;
                break;
            }
            info!(step = step.name(), "running step");
            executed += 1;
            if step.run(state).await == StepAction::Halt {
                warn!(step = step.name(), "step halted");
                status = RunStatus::Halted { step: step.name() };
                break;
            }
        }

        for step in self.steps.iter_mut().take(executed).rev() {
            debug!(step = step.name(), "cleaning up");
            step.cleanup(state).await;
        }

        status
    }
}

/// Everything a build step can reach.
pub struct BuildContext<'env> {
    /// Validated template.
    pub config: &'env BuildConfig,
    /// Provider client.
    pub api: &'env dyn CloudApi,
    /// Remote-connect collaborator.
    pub communicator: &'env dyn Communicator,
    /// Progress sink.
    pub ui: &'env dyn Ui,
    /// Cancellable waiter for step actions.
    pub waiter: ActionWaiter,
    /// Values produced so far.
    pub state: BuildState,
}

impl<'env> BuildContext<'env> {
    /// Creates a context with empty state.
    #[must_use]
    pub fn new(
        config: &'env BuildConfig,
        api: &'env dyn CloudApi,
        communicator: &'env dyn Communicator,
        ui: &'env dyn Ui,
        waiter: ActionWaiter,
    ) -> Self {
        Self {
            config,
            api,
            communicator,
            ui,
            waiter,
            state: BuildState::default(),
        }
    }

    /// Reports `err`, records it if it is the first, and halts.
    pub fn halt(&mut self, err: BuildError) -> StepAction {
        self.ui.error(&err.to_string());
        self.state.record_error(err);
        StepAction::Halt
    }

    /// Maps a step body's result onto a step action.
    pub fn finish(&mut self, result: Result<(), BuildError>) -> StepAction {
        match result {
            Ok(()) => StepAction::Continue,
            Err(err) => self.halt(err),
        }
    }

    /// Records a cleanup failure without touching the build's error.
    pub fn report_cleanup(&mut self, step: &'static str, message: String) {
        self.ui.error(&message);
        self.state.cleanup_reports.push(CleanupReport { step, message });
    }
}
