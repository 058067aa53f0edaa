//! Constructor surface for tasks

use crate::error::{Exception, TaskError};
use crate::routine::Routine;
use crate::scheduler::Scheduler;
use crate::task::status::Strategy;
use crate::task::work::{IntoOutcome, Parameter, Work, WorkKind};
use crate::task::Task;
use crate::TaskResult;
use std::any::Any;
use std::sync::Arc;

/// Builds tasks bound to one scheduler
///
/// Obtained from [`Scheduler::task`] or [`Task::builder`]. The strategy
/// defaults to [`Strategy::BackgroundThread`].
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    scheduler: Scheduler,
    strategy: Strategy,
}

impl TaskBuilder {
    pub(crate) fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            strategy: Strategy::default(),
        }
    }

    /// Set the execution strategy
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    fn check_executable(&self, work: WorkKind) -> Result<(), TaskError> {
        match self.strategy {
            Strategy::Coroutine | Strategy::Custom => Err(TaskError::InvalidStrategy {
                strategy: self.strategy,
                work,
            }),
            _ => Ok(()),
        }
    }

    /// A task running a zero-argument action
    ///
    /// Fails with [`TaskError::InvalidStrategy`] for `Coroutine` (use
    /// [`routine`](TaskBuilder::routine)) and for `Custom`.
    pub fn action<F, O>(self, action: F) -> TaskResult<Task>
    where
        F: FnOnce() -> O + Send + 'static,
        O: IntoOutcome,
    {
        self.check_executable(WorkKind::Action)?;
        let work = Work::Action(Box::new(move || action().into_outcome()));
        Ok(Task::from_parts(
            Some(self.scheduler),
            self.strategy,
            Some(work),
            None,
        ))
    }

    /// A task running a delegate over `parameter`
    ///
    /// The task owns the parameter; the delegate borrows it when it runs.
    pub fn with_param<P, F, O>(self, parameter: P, delegate: F) -> TaskResult<Task>
    where
        P: Any + Send + Sync,
        F: FnOnce(&P) -> O + Send + 'static,
        O: IntoOutcome,
    {
        self.check_executable(WorkKind::Parameterized)?;
        let parameter = Arc::new(parameter);
        let bound = parameter.clone();
        let work = Work::Parameterized(Box::new(move || delegate(&bound).into_outcome()));
        Ok(Task::from_parts(
            Some(self.scheduler),
            self.strategy,
            Some(work),
            Some(parameter as Parameter),
        ))
    }

    /// A Coroutine task over `routine`
    ///
    /// The strategy is forced to `Coroutine`. Fails with
    /// [`TaskError::EmptyRoutine`] if the routine reports no steps.
    pub fn routine<R>(self, routine: R) -> TaskResult<Task>
    where
        R: Routine + 'static,
    {
        self.build_routine(Box::new(routine), None)
    }

    /// A Coroutine task whose routine is built from `parameter`
    pub fn routine_with_param<P, R, F>(self, parameter: P, make: F) -> TaskResult<Task>
    where
        P: Any + Send + Sync,
        R: Routine + 'static,
        F: FnOnce(Arc<P>) -> R,
    {
        let parameter = Arc::new(parameter);
        let routine = make(parameter.clone());
        self.build_routine(Box::new(routine), Some(parameter as Parameter))
    }

    fn build_routine(
        self,
        routine: Box<dyn Routine>,
        parameter: Option<Parameter>,
    ) -> TaskResult<Task> {
        if routine.is_empty() {
            return Err(TaskError::EmptyRoutine);
        }
        if self.strategy != Strategy::Coroutine && self.strategy != Strategy::default() {
            tracing::debug!(requested = ?self.strategy, "routine task forced to Coroutine");
        }
        Ok(Task::from_parts(
            Some(self.scheduler),
            Strategy::Coroutine,
            Some(Work::Routine(routine)),
            parameter,
        ))
    }

    /// A Custom task with no work, completed through
    /// [`Task::set_success`] / [`Task::set_fault`]
    pub fn custom(self) -> Task {
        Task::from_parts(Some(self.scheduler), Strategy::Custom, None, None)
    }

    /// A task that is already Faulted with `error`
    pub fn faulted<E>(self, error: E) -> Task
    where
        E: Into<anyhow::Error>,
    {
        let task = self.custom();
        task.complete(Err(Exception::new(error)));
        task
    }
}
