//! In-flight routine registry
//!
//! Owned by the main thread: only `tick()` advances entries. New routines
//! arrive through the scheduler's guarded pending queue and are adopted at
//! the start of a tick.

use crate::routine::{Routine, Step};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Identifier of a registered routine
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RoutineId(u64);

static NEXT_ROUTINE_ID: AtomicU64 = AtomicU64::new(1);

impl RoutineId {
    pub(crate) fn next() -> Self {
        RoutineId(NEXT_ROUTINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

pub(crate) type Completion = Box<dyn FnOnce() + Send>;

/// A routine plus its completion callback
pub(crate) struct RoutineEntry {
    pub(crate) id: RoutineId,
    routine: Box<dyn Routine>,
    on_complete: Option<Completion>,
    /// Not resumed before this time
    resume_at: Option<Duration>,
}

impl RoutineEntry {
    pub(crate) fn new(id: RoutineId, routine: Box<dyn Routine>, on_complete: Completion) -> Self {
        Self {
            id,
            routine,
            on_complete: Some(on_complete),
            resume_at: None,
        }
    }
}

/// Outcome of advancing one entry
pub(crate) enum Advance {
    /// Still waiting on a deadline; not resumed
    Waiting,
    /// Resumed and still alive
    Stepped,
    /// Exhausted; carries its completion callback
    Finished(Option<Completion>),
}

impl RoutineEntry {
    pub(crate) fn advance(&mut self, now: Duration) -> Advance {
        if let Some(at) = self.resume_at {
            if now < at {
                return Advance::Waiting;
            }
            self.resume_at = None;
        }

        match self.routine.resume() {
            Step::Continue => Advance::Stepped,
            Step::Wait(delay) => {
                self.resume_at = Some(now.saturating_add(delay));
                Advance::Stepped
            }
            Step::Done => Advance::Finished(self.on_complete.take()),
        }
    }
}

/// Entries being advanced during one tick
///
/// If a step panics, dropping the pass puts the survivors and the entries not
/// yet visited back into the registry in their original order. The entry
/// whose step panicked is lost.
pub(crate) struct AdvancePass<'a> {
    registry: &'a parking_lot::Mutex<VecDeque<RoutineEntry>>,
    unvisited: VecDeque<RoutineEntry>,
    kept: Vec<RoutineEntry>,
}

impl<'a> AdvancePass<'a> {
    pub(crate) fn begin(registry: &'a parking_lot::Mutex<VecDeque<RoutineEntry>>) -> Self {
        let unvisited = std::mem::take(&mut *registry.lock());
        Self {
            registry,
            unvisited,
            kept: Vec::new(),
        }
    }

    pub(crate) fn next_entry(&mut self) -> Option<RoutineEntry> {
        self.unvisited.pop_front()
    }

    pub(crate) fn keep(&mut self, entry: RoutineEntry) {
        self.kept.push(entry);
    }
}

impl Drop for AdvancePass<'_> {
    fn drop(&mut self) {
        let mut active = self.registry.lock();
        let late = std::mem::take(&mut *active);
        active.extend(self.kept.drain(..));
        active.extend(self.unvisited.drain(..));
        active.extend(late);
    }
}
