//! Main-thread scheduler driven by host ticks

use crate::config::SchedulerOptions;
use crate::error::TaskError;
use crate::routine::Routine;
use crate::scheduler::clock::{Clock, SystemClock};
use crate::scheduler::registry::{Advance, AdvancePass, RoutineEntry, RoutineId};
use crate::scheduler::worker::{BackgroundPool, Job};
use crate::task::TaskBuilder;
use crate::TaskResult;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

type Action = Box<dyn FnOnce() + Send>;

/// Scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Completed `tick()` calls
    pub ticks: u64,

    /// Main-thread actions executed
    pub actions_run: u64,

    /// Routines registered
    pub routines_started: u64,

    /// Routines that ran to exhaustion
    pub routines_completed: u64,

    /// Jobs handed to the background pool
    pub background_jobs: u64,

    /// Actions waiting for the next tick
    pub pending_actions: usize,

    /// Routines registered or in flight
    pub active_routines: usize,

    /// Background worker threads (0 until the pool is first used)
    pub background_workers: usize,
}

/// What one `tick()` did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Main-thread actions executed
    pub actions_run: usize,

    /// Routines resumed by one step
    pub routines_advanced: usize,

    /// Routines that finished this tick
    pub routines_completed: usize,
}

impl AddAssign for TickReport {
    fn add_assign(&mut self, other: TickReport) {
        self.actions_run += other.actions_run;
        self.routines_advanced += other.routines_advanced;
        self.routines_completed += other.routines_completed;
    }
}

/// Work submitted from any thread, waiting for the next tick
#[derive(Default)]
struct Pending {
    actions: VecDeque<Action>,
    routines: Vec<RoutineEntry>,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    actions_run: AtomicU64,
    routines_started: AtomicU64,
    routines_completed: AtomicU64,
    background_jobs: AtomicU64,
}

struct SchedulerInner {
    /// Thread that created the scheduler
    main_thread: ThreadId,

    /// The only state mutated from other threads
    pending: Mutex<Pending>,

    /// In-flight routines, advanced only by `tick()`
    routines: Mutex<VecDeque<RoutineEntry>>,

    clock: Arc<dyn Clock>,

    /// Started on first BackgroundThread dispatch
    pool: OnceCell<BackgroundPool>,

    options: SchedulerOptions,
    single_threaded: AtomicBool,
    log_errors: AtomicBool,
    counters: Counters,
}

/// Thread-affine scheduler for main-thread and cooperative work
///
/// The thread that constructs a scheduler is its main thread for the
/// scheduler's whole lifetime. Any thread may enqueue actions or register
/// routines; only the main thread may [`tick`](Scheduler::tick).
///
/// `Scheduler` is a cheap handle; clones share the same queues.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

static GLOBAL: Lazy<Scheduler> = Lazy::new(|| {
    let scheduler = Scheduler::with_options(SchedulerOptions::from_env());
    tracing::debug!(main_thread = ?scheduler.main_thread(), "global scheduler initialized");
    scheduler
});

impl Scheduler {
    /// Create a scheduler with default options, owned by the calling thread
    pub fn new() -> Self {
        Self::with_options(SchedulerOptions::default())
    }

    /// Create a scheduler with the given options, owned by the calling thread
    pub fn with_options(options: SchedulerOptions) -> Self {
        Self::with_clock(options, SystemClock::new())
    }

    /// Create a scheduler with a custom time source
    pub fn with_clock<C>(options: SchedulerOptions, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        Self {
            inner: Arc::new(SchedulerInner {
                main_thread: thread::current().id(),
                pending: Mutex::new(Pending::default()),
                routines: Mutex::new(VecDeque::new()),
                clock: Arc::new(clock),
                pool: OnceCell::new(),
                single_threaded: AtomicBool::new(options.single_threaded),
                log_errors: AtomicBool::new(options.log_errors),
                options,
                counters: Counters::default(),
            }),
        }
    }

    /// The process-wide scheduler
    ///
    /// Lazily created on first access; the accessing thread becomes its main
    /// thread. Hosts must touch it from their real main thread at startup,
    /// before any task is built on it. Options come from
    /// [`SchedulerOptions::from_env`].
    pub fn global() -> &'static Scheduler {
        &GLOBAL
    }

    /// Start building a task bound to this scheduler
    pub fn task(&self) -> TaskBuilder {
        TaskBuilder::new(self.clone())
    }

    /// Thread captured as the main thread
    pub fn main_thread(&self) -> ThreadId {
        self.inner.main_thread
    }

    /// Whether the calling thread is the main thread
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.inner.main_thread
    }

    /// Queue an action for the main thread
    ///
    /// Never runs inline, even when called from the main thread: an action
    /// enqueued during tick N runs no earlier than tick N+1.
    pub fn enqueue_main_thread<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = self.inner.pending.lock();
        pending.actions.push_back(Box::new(action));
        tracing::trace!(queued = pending.actions.len(), "main-thread action enqueued");
    }

    /// Register a routine to be advanced one step per tick
    ///
    /// Callable from any thread. The routine takes its first step on the
    /// first tick that begins after registration. `on_complete` runs on the
    /// main thread, in the tick where the routine reports [`Step::Done`].
    ///
    /// [`Step::Done`]: crate::Step::Done
    pub fn start_routine<R, F>(&self, routine: R, on_complete: F) -> RoutineId
    where
        R: Routine + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.start_boxed_routine(Box::new(routine), Box::new(on_complete))
    }

    pub(crate) fn start_boxed_routine(
        &self,
        routine: Box<dyn Routine>,
        on_complete: Box<dyn FnOnce() + Send>,
    ) -> RoutineId {
        let id = RoutineId::next();
        self.inner
            .pending
            .lock()
            .routines
            .push(RoutineEntry::new(id, routine, on_complete));
        self.inner
            .counters
            .routines_started
            .fetch_add(1, Ordering::Relaxed);
        tracing::trace!(routine = id.as_u64(), "routine registered");
        id
    }

    /// Run one host cycle
    ///
    /// Must be called from the main thread. Drains every action queued
    /// before this call in FIFO order, then advances each in-flight routine
    /// by one step (routines still inside a wait are skipped). Routines that
    /// finish are removed and their completion callbacks invoked.
    ///
    /// A panic inside an action or a routine step propagates to the caller.
    /// Actions that had not run yet stay queued for the next tick.
    pub fn tick(&self) -> TaskResult<TickReport> {
        let caller = thread::current().id();
        if caller != self.inner.main_thread {
            return Err(TaskError::NotMainThread {
                caller,
                main: self.inner.main_thread,
            });
        }

        let (actions, adopted) = {
            let mut pending = self.inner.pending.lock();
            (
                std::mem::take(&mut pending.actions),
                std::mem::take(&mut pending.routines),
            )
        };
        self.inner.routines.lock().extend(adopted);

        let mut report = TickReport::default();

        let mut drain = DrainPass {
            pending: &self.inner.pending,
            remaining: actions,
        };
        while let Some(action) = drain.remaining.pop_front() {
            action();
            report.actions_run += 1;
        }
        drop(drain);

        let now = self.inner.clock.now();
        let mut completions = Vec::new();
        {
            let mut pass = AdvancePass::begin(&self.inner.routines);
            while let Some(mut entry) = pass.next_entry() {
                match entry.advance(now) {
                    Advance::Waiting => pass.keep(entry),
                    Advance::Stepped => {
                        report.routines_advanced += 1;
                        pass.keep(entry);
                    }
                    Advance::Finished(on_complete) => {
                        report.routines_advanced += 1;
                        report.routines_completed += 1;
                        tracing::trace!(routine = entry.id.as_u64(), "routine finished");
                        completions.extend(on_complete);
                    }
                }
            }
        }

        for on_complete in completions {
            on_complete();
        }

        let counters = &self.inner.counters;
        counters.ticks.fetch_add(1, Ordering::Relaxed);
        counters
            .actions_run
            .fetch_add(report.actions_run as u64, Ordering::Relaxed);
        counters
            .routines_completed
            .fetch_add(report.routines_completed as u64, Ordering::Relaxed);

        tracing::trace!(
            actions = report.actions_run,
            advanced = report.routines_advanced,
            completed = report.routines_completed,
            "tick"
        );

        Ok(report)
    }

    /// Hand a job to the background pool, starting the pool if needed
    pub(crate) fn spawn_background(&self, job: Job) -> TaskResult<()> {
        let pool = self
            .inner
            .pool
            .get_or_try_init(|| BackgroundPool::start(self.inner.options.resolved_workers()))?;
        pool.submit(job);
        self.inner
            .counters
            .background_jobs
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Whether BackgroundThread tasks are redirected to the starting thread
    pub fn multithreading_disabled(&self) -> bool {
        self.inner.single_threaded.load(Ordering::Acquire)
    }

    /// Redirect BackgroundThread tasks to run inline (for deterministic tests)
    pub fn set_multithreading_disabled(&self, disabled: bool) {
        self.inner.single_threaded.store(disabled, Ordering::Release);
    }

    /// Whether task faults are logged
    pub fn error_logging(&self) -> bool {
        self.inner.log_errors.load(Ordering::Acquire)
    }

    /// Turn fault logging on or off
    pub fn set_error_logging(&self, enabled: bool) {
        self.inner.log_errors.store(enabled, Ordering::Release);
    }

    /// Poll interval used by blocking waits
    pub fn wait_interval(&self) -> Duration {
        self.inner.options.wait_interval
    }

    /// Current time on this scheduler's clock
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    /// Options this scheduler was built with
    pub fn options(&self) -> &SchedulerOptions {
        &self.inner.options
    }

    /// Number of actions waiting for the next tick
    pub fn pending_actions(&self) -> usize {
        self.inner.pending.lock().actions.len()
    }

    /// Number of routines registered or in flight
    pub fn active_routines(&self) -> usize {
        let waiting = self.inner.pending.lock().routines.len();
        waiting + self.inner.routines.lock().len()
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.inner.counters;
        SchedulerStats {
            ticks: counters.ticks.load(Ordering::Relaxed),
            actions_run: counters.actions_run.load(Ordering::Relaxed),
            routines_started: counters.routines_started.load(Ordering::Relaxed),
            routines_completed: counters.routines_completed.load(Ordering::Relaxed),
            background_jobs: counters.background_jobs.load(Ordering::Relaxed),
            pending_actions: self.pending_actions(),
            active_routines: self.active_routines(),
            background_workers: self.inner.pool.get().map_or(0, |p| p.worker_count()),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("main_thread", &self.inner.main_thread)
            .field("pending_actions", &self.pending_actions())
            .field("active_routines", &self.active_routines())
            .finish()
    }
}

/// Actions drained by one tick
///
/// If an action panics, the ones not yet run go back to the front of the
/// pending queue, ahead of anything enqueued since.
struct DrainPass<'a> {
    pending: &'a Mutex<Pending>,
    remaining: VecDeque<Action>,
}

impl Drop for DrainPass<'_> {
    fn drop(&mut self) {
        if self.remaining.is_empty() {
            return;
        }
        let mut pending = self.pending.lock();
        let later = std::mem::take(&mut pending.actions);
        pending.actions = std::mem::take(&mut self.remaining);
        pending.actions.extend(later);
    }
}
