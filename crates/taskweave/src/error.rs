//! Error types for task construction, scheduling and execution faults

use crate::task::{Strategy, WorkKind};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

/// Errors produced by the task and scheduler APIs
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The requested strategy cannot run this kind of work
    #[error("{strategy:?} strategy cannot execute {work:?} work")]
    InvalidStrategy {
        /// Requested strategy
        strategy: Strategy,
        /// Kind of work supplied
        work: WorkKind,
    },

    /// A routine with no steps was supplied
    #[error("routine has no steps")]
    EmptyRoutine,

    /// `tick()` was called off the main thread
    #[error("tick() called from {caller:?}, main thread is {main:?}")]
    NotMainThread {
        /// Thread that made the call
        caller: ThreadId,
        /// Thread captured as the main thread
        main: ThreadId,
    },

    /// The task finished in the Faulted state
    #[error("task faulted: {0}")]
    Faulted(Exception),

    /// A unit of work panicked
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The background pool could not start a worker thread
    #[error("failed to spawn background worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// A captured execution fault
///
/// Wraps the error raised by a unit of work. Cloning is cheap, so the same
/// fault can be handed to every continuation that inspects the task.
#[derive(Clone)]
pub struct Exception(Arc<anyhow::Error>);

impl Exception {
    /// Wrap an error value
    pub fn new<E>(error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Exception(Arc::new(error.into()))
    }

    /// Build an exception from a plain message
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Exception(Arc::new(anyhow::Error::msg(message)))
    }

    /// Borrow the underlying error as a concrete type, if it is one
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Check whether the underlying error is of type `E`
    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.is::<E>()
    }

    /// Whether both handles refer to the same captured fault
    pub fn ptr_eq(a: &Exception, b: &Exception) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl From<anyhow::Error> for Exception {
    fn from(error: anyhow::Error) -> Self {
        Exception(Arc::new(error))
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for Exception {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let inner: &(dyn StdError + Send + Sync + 'static) = &**self.0;
        inner.source()
    }
}

/// Render a panic payload as text
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
