//! Background worker pool for BackgroundThread tasks
//!
//! Fire-and-forget: jobs go into a shared injector and any idle worker picks
//! them up. There is no ordering guarantee between jobs.
//!
//! The pool keeps a core of workers and grows by one thread whenever a job
//! is submitted while every worker is busy, so a job that blocks on another
//! background job cannot starve the pool. Workers above the core count exit
//! after staying idle for `RETIRE_AFTER`.

use crate::error::{panic_message, TaskError};
use crossbeam_deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// How long an idle worker sleeps before rechecking the injector
const IDLE_TIMEOUT: Duration = Duration::from_millis(10);

/// Idle time after which a worker above the core count exits
const RETIRE_AFTER: Duration = Duration::from_secs(2);

/// How long shutdown waits for workers before detaching them
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

struct PoolShared {
    /// Pending jobs
    injector: Injector<Job>,
    /// Guards idle waits and growth decisions
    idle: Mutex<()>,
    notify: Condvar,
    shutdown: AtomicBool,
    /// Workers that never retire
    core: usize,
    /// Live worker threads
    live: AtomicUsize,
    /// Workers currently running a job
    busy: AtomicUsize,
    next_id: AtomicUsize,
    executed: AtomicU64,
}

impl PoolShared {
    /// Every live worker is running a job. Call with `idle` held.
    fn starved(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire)
            && self.busy.load(Ordering::Acquire) >= self.live.load(Ordering::Acquire)
    }

    /// Give up one worker slot if the pool is above its core size
    fn try_retire(&self) -> bool {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live > self.core).then(|| live - 1)
            })
            .is_ok()
    }
}

/// Growable pool of background worker threads
pub(crate) struct BackgroundPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundPool {
    /// Spawn `size` core workers
    ///
    /// Fails only if no worker at all could be started.
    pub(crate) fn start(size: usize) -> Result<Self, TaskError> {
        let core = size.max(1);
        let shared = Arc::new(PoolShared {
            injector: Injector::new(),
            idle: Mutex::new(()),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            core,
            live: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            next_id: AtomicUsize::new(0),
            executed: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(core);
        for _ in 0..core {
            match spawn_worker(&shared) {
                Ok(handle) => handles.push(handle),
                Err(e) if handles.is_empty() => return Err(TaskError::WorkerSpawn(e)),
                Err(e) => {
                    tracing::warn!(error = %e, "background worker failed to start");
                    break;
                }
            }
        }

        tracing::debug!(workers = handles.len(), "background pool started");

        Ok(Self {
            shared,
            handles: Mutex::new(handles),
        })
    }

    /// Queue a job, adding a worker if none is free to take it
    pub(crate) fn submit(&self, job: Job) {
        self.shared.injector.push(job);
        let _guard = self.shared.idle.lock();
        if self.shared.starved() {
            match spawn_worker(&self.shared) {
                Ok(handle) => {
                    let mut handles = self.handles.lock();
                    handles.retain(|h| !h.is_finished());
                    handles.push(handle);
                    tracing::debug!(
                        workers = self.shared.live.load(Ordering::Relaxed),
                        "background pool grown"
                    );
                }
                Err(e) => tracing::warn!(error = %e, "background pool could not grow"),
            }
        }
        self.shared.notify.notify_one();
    }

    /// Number of live worker threads
    pub(crate) fn worker_count(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Total jobs executed so far
    #[cfg(test)]
    pub(crate) fn executed(&self) -> u64 {
        self.shared.executed.load(Ordering::Relaxed)
    }

    /// Worker thread main loop
    fn run_loop(id: usize, shared: Arc<PoolShared>) {
        let mut idle_since = Instant::now();
        let mut retired = false;

        loop {
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }

            match shared.injector.steal() {
                Steal::Success(job) => {
                    shared.busy.fetch_add(1, Ordering::AcqRel);
                    // A panicking job must not take the worker down with it
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                        tracing::error!(
                            worker = id,
                            panic = %panic_message(payload.as_ref()),
                            "background job panicked"
                        );
                    }
                    shared.busy.fetch_sub(1, Ordering::AcqRel);
                    shared.executed.fetch_add(1, Ordering::Relaxed);
                    idle_since = Instant::now();
                }
                Steal::Retry => continue,
                Steal::Empty => {
                    let mut guard = shared.idle.lock();
                    // Re-check under the lock so a submit between steal() and
                    // wait is not missed
                    if !shared.injector.is_empty() || shared.shutdown.load(Ordering::Acquire) {
                        continue;
                    }
                    if idle_since.elapsed() >= RETIRE_AFTER && shared.try_retire() {
                        retired = true;
                        break;
                    }
                    shared.notify.wait_for(&mut guard, IDLE_TIMEOUT);
                }
            }
        }

        if !retired {
            shared.live.fetch_sub(1, Ordering::AcqRel);
        }
        tracing::trace!(worker = id, retired, "background worker exiting");
    }

    /// Signal workers to exit and join them
    ///
    /// Workers still busy after the shutdown timeout are detached.
    pub(crate) fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.shared.idle.lock();
            self.shared.notify.notify_all();
        }

        let current = thread::current().id();
        let handles = std::mem::take(&mut *self.handles.lock());
        let start = Instant::now();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            loop {
                if handle.is_finished() {
                    let _ = handle.join();
                    break;
                }
                if start.elapsed() > SHUTDOWN_TIMEOUT {
                    tracing::warn!("background worker still busy at shutdown; detaching");
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

/// Start one worker thread, counting it as live before it runs
fn spawn_worker(shared: &Arc<PoolShared>) -> io::Result<JoinHandle<()>> {
    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
    shared.live.fetch_add(1, Ordering::AcqRel);

    let worker_shared = shared.clone();
    let spawned = thread::Builder::new()
        .name(format!("taskweave-worker-{}", id))
        .spawn(move || BackgroundPool::run_loop(id, worker_shared));

    if spawned.is_err() {
        shared.live.fetch_sub(1, Ordering::AcqRel);
    }
    spawned
}

impl Drop for BackgroundPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
