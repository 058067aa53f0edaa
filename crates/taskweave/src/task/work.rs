//! The unit of work carried by a Task

use crate::routine::Routine;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque input value owned by a Task
pub type Parameter = Arc<dyn Any + Send + Sync>;

/// Zero-argument call producing the task's outcome
pub(crate) type UnitOfWork = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Exactly one kind of work per task
pub(crate) enum Work {
    /// A plain action
    Action(UnitOfWork),
    /// A delegate bound to the task's parameter at construction
    Parameterized(UnitOfWork),
    /// A cooperative routine
    Routine(Box<dyn Routine>),
}

impl Work {
    pub(crate) fn kind(&self) -> WorkKind {
        match self {
            Work::Action(_) => WorkKind::Action,
            Work::Parameterized(_) => WorkKind::Parameterized,
            Work::Routine(_) => WorkKind::Routine,
        }
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Work::{:?}", self.kind())
    }
}

/// Kind of work a task was built with
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkKind {
    /// Zero-argument action
    Action,
    /// One-argument delegate over the task parameter
    Parameterized,
    /// Cooperative routine
    Routine,
}

/// Return values a unit of work may produce
///
/// `()` is success; `Err` from a `Result` becomes the task's exception.
pub trait IntoOutcome {
    /// Convert into the task outcome
    fn into_outcome(self) -> anyhow::Result<()>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<E> IntoOutcome for Result<(), E>
where
    E: Into<anyhow::Error>,
{
    fn into_outcome(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}
