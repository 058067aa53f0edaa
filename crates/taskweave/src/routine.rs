//! Cooperative routines
//!
//! A routine is a finite state machine advanced by the scheduler, one call to
//! [`Routine::resume`] per tick. Each call runs the routine up to its next
//! yield point and reports what the scheduler should do before resuming it
//! again.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// What a routine asks the scheduler to do after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Resume on the next tick
    Continue,
    /// Do not resume until this much time has elapsed
    Wait(Duration),
    /// The routine is exhausted
    Done,
}

impl Step {
    /// Wait for a number of seconds (negative or NaN waits are zero)
    pub fn wait_seconds(seconds: f64) -> Step {
        let seconds = if seconds.is_nan() { 0.0 } else { seconds.max(0.0) };
        Step::Wait(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
    }
}

/// A resumable, step-wise unit of work
///
/// Nothing runs until the first `resume`. Steps execute on the scheduler's
/// main thread inside `tick()`; a panic inside a step is not caught and
/// propagates out of `tick()`.
pub trait Routine: Send {
    /// Run until the next yield point
    fn resume(&mut self) -> Step;

    /// Whether the routine is known to contain no steps
    fn is_empty(&self) -> bool {
        false
    }
}

impl<F> Routine for F
where
    F: FnMut() -> Step + Send,
{
    fn resume(&mut self) -> Step {
        self()
    }
}

type StepFn = Box<dyn FnOnce() -> Step + Send>;

/// An ordered list of step bodies
///
/// Each body runs once, on its own tick, and returns the yield instruction
/// that follows it. Once every body has run the routine reports
/// [`Step::Done`]. A body returning `Done` ends the routine early.
#[derive(Default)]
pub struct Steps {
    steps: VecDeque<StepFn>,
    finished: bool,
}

impl Steps {
    /// Create an empty step list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step body
    pub fn then<F>(mut self, step: F) -> Self
    where
        F: FnOnce() -> Step + Send + 'static,
    {
        self.steps.push_back(Box::new(step));
        self
    }

    /// Number of step bodies not yet run
    pub fn remaining(&self) -> usize {
        if self.finished {
            0
        } else {
            self.steps.len()
        }
    }
}

impl Routine for Steps {
    fn resume(&mut self) -> Step {
        if self.finished {
            return Step::Done;
        }
        match self.steps.pop_front() {
            Some(step) => {
                let next = step();
                if next == Step::Done {
                    self.finished = true;
                    self.steps.clear();
                }
                next
            }
            None => {
                self.finished = true;
                Step::Done
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

impl fmt::Debug for Steps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Steps")
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Routine over an iterator of yield instructions
///
/// The iterator is lazy: each `next()` is one step. Exhaustion is `Done`.
#[derive(Debug)]
pub struct FromIter<I> {
    iter: I,
}

/// Adapt an iterator of [`Step`]s into a routine
pub fn from_iter<I>(iter: I) -> FromIter<I::IntoIter>
where
    I: IntoIterator<Item = Step>,
    I::IntoIter: Send,
{
    FromIter {
        iter: iter.into_iter(),
    }
}

impl<I> Routine for FromIter<I>
where
    I: Iterator<Item = Step> + Send,
{
    fn resume(&mut self) -> Step {
        self.iter.next().unwrap_or(Step::Done)
    }
}
