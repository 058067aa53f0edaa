//! Taskweave
//!
//! A small future/promise abstraction for hosts driven by a per-frame update
//! loop. One [`Task`] handle covers four ways of running a unit of work:
//! - on a background worker thread
//! - on the host's main thread, during the next [`Scheduler::tick`]
//! - inline on the calling thread
//! - as a cooperative [`Routine`] advanced one step per tick
//!
//! The [`Scheduler`] owns the main-thread queue and the routine registry.
//! The host must call [`Scheduler::tick`] once per cycle from the thread that
//! created the scheduler.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod host;
pub mod routine;
pub mod scheduler;
pub mod task;

pub use config::SchedulerOptions;
pub use error::{Exception, TaskError};
pub use host::FrameLoop;
pub use routine::{FromIter, Routine, Step, Steps};
pub use scheduler::{
    Clock, ManualClock, RoutineId, Scheduler, SchedulerStats, SystemClock, TickReport,
};
pub use task::{
    IntoOutcome, Parameter, Strategy, Task, TaskBuilder, TaskId, TaskStatus, WaitForTask,
    WorkKind,
};

/// Result alias used throughout the crate
pub type TaskResult<T> = Result<T, TaskError>;
