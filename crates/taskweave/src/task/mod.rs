//! Tasks: a unit of work with a status lifecycle and completion hooks

mod builder;
mod status;
#[allow(clippy::module_inception)]
mod task;
mod wait;
mod work;

pub use builder::TaskBuilder;
pub use status::{Strategy, TaskId, TaskStatus};
pub use task::Task;
pub use wait::WaitForTask;
pub use work::{IntoOutcome, Parameter, WorkKind};
