//! Task handle, state machine and completion pipeline

use crate::config::DEFAULT_WAIT_INTERVAL;
use crate::error::{panic_message, Exception, TaskError};
use crate::scheduler::Scheduler;
use crate::task::status::{Strategy, TaskId, TaskStatus};
use crate::task::wait::WaitForTask;
use crate::task::work::{Parameter, UnitOfWork, Work};
use crate::task::TaskBuilder;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

type CompletionCallback = Box<dyn FnOnce(&Task) + Send>;
type SuccessCallback = Box<dyn FnOnce() + Send>;

struct TaskState {
    status: TaskStatus,

    /// Set only together with `Faulted`
    exception: Option<Exception>,

    parameter: Option<Parameter>,

    /// Taken by `start()`
    work: Option<Work>,

    /// Fired once, in registration order, on the terminal transition
    completion: Vec<CompletionCallback>,

    /// Fired after `completion`, only on Success
    success: Vec<SuccessCallback>,

    /// True while the completion pipeline is running
    notifying: bool,

    /// Set by `dispose()`; a disposed task never leaves Created again
    disposed: bool,
}

struct TaskInner {
    id: TaskId,
    strategy: Strategy,
    /// None for tasks that never dispatch (pre-faulted, unbound custom)
    scheduler: Option<Scheduler>,
    state: Mutex<TaskState>,
}

/// Handle to a unit of asynchronous work
///
/// Clones refer to the same task. The handle exposes status, the captured
/// exception and continuation hooks regardless of which [`Strategy`] runs
/// the work.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    pub(crate) fn from_parts(
        scheduler: Option<Scheduler>,
        strategy: Strategy,
        work: Option<Work>,
        parameter: Option<Parameter>,
    ) -> Task {
        Task {
            inner: Arc::new(TaskInner {
                id: TaskId::new(),
                strategy,
                scheduler,
                state: Mutex::new(TaskState {
                    status: TaskStatus::Created,
                    exception: None,
                    parameter,
                    work,
                    completion: Vec::new(),
                    success: Vec::new(),
                    notifying: false,
                    disposed: false,
                }),
            }),
        }
    }

    /// Build a task on the process-wide scheduler
    ///
    /// See [`Scheduler::global`] for how its main thread is chosen.
    pub fn builder() -> TaskBuilder {
        Scheduler::global().task()
    }

    /// A task that is already Faulted with `error`; no work ever runs
    pub fn faulted<E>(error: E) -> Task
    where
        E: Into<anyhow::Error>,
    {
        let task = Task::from_parts(None, Strategy::Custom, None, None);
        task.complete(Err(Exception::new(error)));
        task
    }

    /// A Custom task with no work, completed by its owner
    ///
    /// See [`Task::set_success`] and [`Task::set_fault`].
    pub fn custom() -> Task {
        Task::from_parts(None, Strategy::Custom, None, None)
    }

    /// Unique task id
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Execution strategy, fixed at construction
    pub fn strategy(&self) -> Strategy {
        self.inner.strategy
    }

    /// Scheduler this task dispatches through, if any
    pub fn scheduler(&self) -> Option<&Scheduler> {
        self.inner.scheduler.as_ref()
    }

    /// Current status
    pub fn status(&self) -> TaskStatus {
        self.inner.state.lock().status
    }

    /// Status is Running
    pub fn is_running(&self) -> bool {
        self.status() == TaskStatus::Running
    }

    /// Status is Faulted or Success
    pub fn is_completed(&self) -> bool {
        self.status().is_terminal()
    }

    /// Status is Faulted
    pub fn is_faulted(&self) -> bool {
        self.status() == TaskStatus::Faulted
    }

    /// Status is Success
    pub fn is_success(&self) -> bool {
        self.status() == TaskStatus::Success
    }

    /// The captured fault; present iff the task is Faulted
    pub fn exception(&self) -> Option<Exception> {
        self.inner.state.lock().exception.clone()
    }

    /// The task's parameter, if it was built with one
    pub fn parameter(&self) -> Option<Parameter> {
        self.inner.state.lock().parameter.clone()
    }

    /// The parameter as a concrete type
    pub fn parameter_as<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.parameter().and_then(|p| p.downcast::<T>().ok())
    }

    /// Whether both handles refer to the same task
    pub fn ptr_eq(a: &Task, b: &Task) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Dispatch the work according to the task's strategy
    ///
    /// A no-op unless the task is Created. A disposed task, or a Created task
    /// with no work, is also left untouched. Custom tasks only move to
    /// Running.
    pub fn start(&self) -> &Self {
        let work = {
            let mut state = self.inner.state.lock();
            if state.status != TaskStatus::Created {
                tracing::trace!(task = self.id().as_u64(), status = ?state.status, "start() ignored");
                return self;
            }
            if state.disposed {
                tracing::debug!(task = self.id().as_u64(), "start() on a disposed task");
                return self;
            }
            if self.inner.strategy == Strategy::Custom {
                state.status = TaskStatus::Running;
                return self;
            }
            match state.work.take() {
                Some(work) => {
                    state.status = TaskStatus::Running;
                    work
                }
                None => {
                    tracing::debug!(task = self.id().as_u64(), "start() on a task with no work");
                    return self;
                }
            }
        };

        tracing::debug!(
            task = self.id().as_u64(),
            strategy = ?self.inner.strategy,
            "task started"
        );
        self.dispatch(work);
        self
    }

    fn dispatch(&self, work: Work) {
        let Some(scheduler) = self.inner.scheduler.clone() else {
            self.fault(Exception::msg("task has work but no scheduler"));
            return;
        };

        let unit = match work {
            Work::Routine(routine) => {
                let task = self.clone();
                scheduler.start_boxed_routine(
                    routine,
                    Box::new(move || {
                        task.complete(Ok(()));
                    }),
                );
                return;
            }
            Work::Action(unit) | Work::Parameterized(unit) => unit,
        };

        match self.inner.strategy {
            Strategy::CurrentThread => self.execute(unit),
            Strategy::MainThread => {
                let task = self.clone();
                scheduler.enqueue_main_thread(move || task.execute(unit));
            }
            Strategy::BackgroundThread if scheduler.multithreading_disabled() => self.execute(unit),
            Strategy::BackgroundThread => {
                let task = self.clone();
                if let Err(e) = scheduler.spawn_background(Box::new(move || task.execute(unit))) {
                    self.fault(Exception::new(e));
                }
            }
            strategy @ (Strategy::Coroutine | Strategy::Custom) => {
                self.fault(Exception::new(TaskError::InvalidStrategy {
                    strategy,
                    work: crate::task::WorkKind::Action,
                }));
            }
        }
    }

    /// Run the unit of work behind a failure boundary
    ///
    /// An `Err` return or a panic faults the task; a normal return succeeds
    /// it. Nothing is rethrown on the executing thread.
    fn execute(&self, unit: UnitOfWork) {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(unit)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Exception::from(e)),
            Err(payload) => Err(Exception::new(TaskError::Panicked(panic_message(
                payload.as_ref(),
            )))),
        };

        match outcome {
            Ok(()) => {
                self.complete(Ok(()));
            }
            Err(exception) => self.fault(exception),
        }
    }

    fn fault(&self, exception: Exception) {
        let log = self
            .inner
            .scheduler
            .as_ref()
            .map_or(true, |s| s.error_logging());
        if log {
            tracing::error!(task = self.id().as_u64(), error = %exception, "task faulted");
        }
        self.complete(Err(exception));
    }

    /// Move to a terminal status and run the completion pipeline
    ///
    /// Returns false if the task was already terminal. Callbacks run on the
    /// calling thread, outside the state lock: completion callbacks first in
    /// registration order, then success callbacks if the task succeeded.
    pub(crate) fn complete(&self, outcome: Result<(), Exception>) -> bool {
        let status = if outcome.is_ok() {
            TaskStatus::Success
        } else {
            TaskStatus::Faulted
        };

        let (completion, success) = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                tracing::debug!(task = self.id().as_u64(), "completion of a disposed task ignored");
                return false;
            }
            if state.status.is_terminal() {
                if state.status != status {
                    tracing::warn!(
                        task = self.id().as_u64(),
                        from = ?state.status,
                        to = ?status,
                        "ignoring transition out of a terminal status"
                    );
                }
                return false;
            }
            state.status = status;
            state.exception = outcome.err();
            state.notifying = true;

            let completion = std::mem::take(&mut state.completion);
            let mut success = std::mem::take(&mut state.success);
            if status != TaskStatus::Success {
                success.clear();
            }
            (completion, success)
        };

        tracing::debug!(task = self.id().as_u64(), ?status, "task completed");

        let _notifying = NotifyingGuard(&self.inner.state);
        for callback in completion {
            callback(self);
        }
        for callback in success {
            callback();
        }
        true
    }

    /// Complete a Custom task successfully
    ///
    /// Returns false if the task is not Custom or already terminal.
    pub fn set_success(&self) -> bool {
        self.inner.strategy == Strategy::Custom && self.complete(Ok(()))
    }

    /// Fault a Custom task with `error`
    ///
    /// Returns false if the task is not Custom or already terminal.
    pub fn set_fault<E>(&self, error: E) -> bool
    where
        E: Into<anyhow::Error>,
    {
        if self.inner.strategy != Strategy::Custom {
            return false;
        }
        self.complete(Err(Exception::new(error)))
    }

    /// Run `callback` once the task is terminal
    ///
    /// If the task is already terminal the callback runs immediately, on
    /// this thread, before `continue_with` returns. Otherwise it is queued
    /// and runs on whichever thread completes the task.
    pub fn continue_with<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Task) + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            if !state.status.is_terminal() {
                state.completion.push(Box::new(callback));
                return self;
            }
        }
        callback(self);
        self
    }

    /// Run `callback` if the task succeeds
    ///
    /// Same immediacy rule as [`continue_with`](Task::continue_with). Never
    /// runs for a faulted task.
    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            match state.status {
                TaskStatus::Success => {}
                TaskStatus::Faulted => return self,
                _ => {
                    state.success.push(Box::new(callback));
                    return self;
                }
            }
        }
        callback();
        self
    }

    /// Err with the captured exception if the task faulted
    pub fn check(&self) -> Result<(), TaskError> {
        let state = self.inner.state.lock();
        match (&state.status, &state.exception) {
            (TaskStatus::Faulted, Some(exception)) => Err(TaskError::Faulted(exception.clone())),
            _ => Ok(()),
        }
    }

    /// Terminal, with every completion callback fired
    pub(crate) fn is_settled(&self) -> bool {
        let state = self.inner.state.lock();
        state.status.is_terminal() && !state.notifying && state.completion.is_empty()
    }

    /// Block until the task is terminal and its callbacks have fired
    ///
    /// A plain poll with a fixed sleep between checks. Calling this on the
    /// scheduler's main thread logs a warning: MainThread and Coroutine
    /// tasks only progress when the main thread ticks, so the wait can never
    /// end for them. A task that is never started is never waited out.
    pub fn wait(&self) -> &Self {
        let interval = match &self.inner.scheduler {
            Some(scheduler) => {
                if scheduler.is_main_thread() && !self.is_settled() {
                    tracing::warn!(
                        task = self.id().as_u64(),
                        strategy = ?self.inner.strategy,
                        "blocking wait on the main thread"
                    );
                }
                scheduler.wait_interval()
            }
            None => DEFAULT_WAIT_INTERVAL,
        };

        while !self.is_settled() {
            thread::sleep(interval);
        }
        self
    }

    /// Cooperative wait: one step per poll until the task is settled
    pub fn until_complete(&self) -> WaitForTask {
        WaitForTask::new(self.clone())
    }

    /// Reset to Created and release work, parameter, exception and callbacks
    ///
    /// The task is spent afterwards: `start()` and custom completion leave it
    /// in Created. Refused with a warning while the task is Running, since
    /// its worker would otherwise complete a reset task.
    pub fn dispose(&self) {
        let released = {
            let mut state = self.inner.state.lock();
            if state.status == TaskStatus::Running {
                tracing::warn!(task = self.id().as_u64(), "dispose() on a running task ignored");
                return;
            }
            state.status = TaskStatus::Created;
            state.disposed = true;
            (
                state.work.take(),
                state.parameter.take(),
                state.exception.take(),
                std::mem::take(&mut state.completion),
                std::mem::take(&mut state.success),
            )
        };
        // captured closures are dropped outside the lock
        drop(released);
        tracing::trace!(task = self.id().as_u64(), "task disposed");
    }
}

/// Clears the `notifying` flag even if a callback panics
struct NotifyingGuard<'a>(&'a Mutex<TaskState>);

impl Drop for NotifyingGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().notifying = false;
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("strategy", &self.inner.strategy)
            .field("status", &state.status)
            .field("exception", &state.exception)
            .finish()
    }
}
