//! Ordered, fail-fast execution of named setup/run steps.
//!
//! Pipelines are data: each run mode is a different composition of the same
//! task vocabulary, executed by the one engine below.

use tracing::{error, info, warn};

use crate::{error::OrchestratorError, shutdown::ShutdownCoordinator};

/// A named, fallible step executed against a mutable context.
pub struct Task<C> {
    /// Name reported in logs and abort results.
    pub name: &'static str,
    /// Whether a failure aborts the pipeline. Defaults to true.
    pub abort_on_fail: bool,
    /// The side-effecting operation.
    pub action: Box<dyn FnMut(&mut C) -> Result<(), OrchestratorError>>,
}

impl<C> Task<C> {
    /// Creates an abort-on-fail task.
    pub fn new(
        name: &'static str,
        action: impl FnMut(&mut C) -> Result<(), OrchestratorError> + 'static,
    ) -> Self {
        Self {
            name,
            abort_on_fail: true,
            action: Box::new(action),
        }
    }

    /// Marks the task as best-effort: failures are logged and skipped.
    pub fn best_effort(mut self) -> Self {
        self.abort_on_fail = false;
        self
    }
}

/// Outcome of running a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
    /// Every task succeeded.
    Completed,
    /// A task failed; no later task ran and shutdown was invoked.
    Aborted {
        /// Name of the failing task.
        at: &'static str,
    },
}

/// An ordered sequence of tasks executed strictly in declaration order.
pub struct TaskPipeline<C> {
    tasks: Vec<Task<C>>,
}

impl<C> TaskPipeline<C> {
    /// Builds a pipeline from an ordered task list.
    pub fn new(tasks: Vec<Task<C>>) -> Self {
        Self { tasks }
    }

    /// Names of the composed tasks, in execution order.
    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|task| task.name).collect()
    }

    /// Executes the tasks in order. The first failure of an abort-on-fail
    /// task stops the run, routes into `shutdown.run_once()`, and reports
    /// where the pipeline aborted.
    pub fn run(mut self, ctx: &mut C, shutdown: &ShutdownCoordinator) -> PipelineResult {
        for task in &mut self.tasks {
            info!("[{}]", task.name);
            match (task.action)(ctx) {
                Ok(()) => {}
                Err(err) if task.abort_on_fail => {
                    error!("Task '{}' failed: {err}", task.name);
                    shutdown.run_once();
                    return PipelineResult::Aborted { at: task.name };
                }
                Err(err) => {
                    warn!("Task '{}' failed (continuing): {err}", task.name);
                }
            }
        }
        PipelineResult::Completed
    }
}
