//! Task Scheduler - Main Thread and Cooperative Execution
//!
//! The scheduler owns the queue of actions bound for the host's main thread,
//! the registry of cooperative routines, and the background worker pool.
//! The host drives it by calling `tick()` once per cycle.

mod clock;
mod registry;
#[allow(clippy::module_inception)]
mod scheduler;
mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use registry::RoutineId;
pub use scheduler::{Scheduler, SchedulerStats, TickReport};
