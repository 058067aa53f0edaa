//! Task identity, lifecycle status and execution strategy

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle status of a Task
///
/// Transitions run `Created -> Running -> {Faulted | Success}`. The two
/// terminal states are final until the task is disposed, which resets it to
/// `Created`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Built, not started (or reset by dispose)
    Created,
    /// Dispatched and not yet finished
    Running,
    /// Finished with an exception
    Faulted,
    /// Finished normally
    Success,
    /// Torn down; never entered by this crate's own transitions
    Disposed,
}

impl TaskStatus {
    /// Faulted or Success
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Faulted | TaskStatus::Success)
    }
}

/// Where a Task's work runs
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Strategy {
    /// On a background worker thread
    #[default]
    BackgroundThread,
    /// On the scheduler's main thread, during the next tick
    MainThread,
    /// Inline, before `start()` returns
    CurrentThread,
    /// As a routine advanced one step per tick
    Coroutine,
    /// Not executed by the crate; completed by its owner
    Custom,
}
