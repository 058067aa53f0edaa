//! Cooperative waiting on a task

use crate::routine::{Routine, Step};
use crate::task::Task;

/// Yields once per poll until a task is settled
///
/// Settled means terminal with every completion callback fired. Usable as an
/// [`Iterator`] by a host's own step-wise code, or as a [`Routine`] (for
/// example the routine of another Coroutine task), so a single-threaded
/// host never blocks on it.
///
/// It holds no progress of its own: a clone, or the same value polled again
/// later, starts over and simply re-checks the task.
#[derive(Debug, Clone)]
pub struct WaitForTask {
    task: Task,
}

impl WaitForTask {
    pub(crate) fn new(task: Task) -> Self {
        Self { task }
    }

    /// The task being waited on
    pub fn task(&self) -> &Task {
        &self.task
    }
}

impl Iterator for WaitForTask {
    type Item = ();

    fn next(&mut self) -> Option<()> {
        if self.task.is_settled() {
            None
        } else {
            Some(())
        }
    }
}

impl Routine for WaitForTask {
    fn resume(&mut self) -> Step {
        if self.task.is_settled() {
            Step::Done
        } else {
            Step::Continue
        }
    }
}
