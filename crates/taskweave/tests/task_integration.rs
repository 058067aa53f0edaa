//! Integration tests for Task lifecycle, faults and continuations

mod common;

use common::{eventually, init_test_logging};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use taskweave::{
    Scheduler, SchedulerOptions, Strategy, Task, TaskError, TaskResult, TaskStatus,
};

#[derive(Debug, thiserror::Error)]
#[error("operation is not valid in the current state")]
struct InvalidOperationError;

fn deterministic() -> Scheduler {
    Scheduler::with_options(SchedulerOptions::deterministic())
}

fn assert_status_consistent(task: &Task) {
    let status = task.status();
    assert_eq!(
        task.is_completed(),
        status == TaskStatus::Faulted || status == TaskStatus::Success
    );
    assert!(!(task.is_faulted() && task.is_success()));
    assert_eq!(task.exception().is_some(), task.is_faulted());
}

#[test]
fn test_current_thread_action_succeeds() {
    init_test_logging();
    let scheduler = deterministic();
    let x = Arc::new(AtomicI32::new(0));

    let slot = x.clone();
    let task = scheduler
        .task()
        .strategy(Strategy::CurrentThread)
        .action(move || slot.store(5, Ordering::SeqCst))
        .unwrap();
    assert_status_consistent(&task);

    task.start();

    assert_eq!(task.status(), TaskStatus::Success);
    assert_eq!(x.load(Ordering::SeqCst), 5);
    assert_status_consistent(&task);
}

#[test]
fn test_current_thread_throwing_action_faults() {
    init_test_logging();
    let scheduler = deterministic();
    let task = scheduler
        .task()
        .strategy(Strategy::CurrentThread)
        .action(|| -> Result<(), InvalidOperationError> { Err(InvalidOperationError) })
        .unwrap();

    task.start();

    assert!(task.is_faulted());
    assert!(!task.is_success());
    let exception = task.exception().expect("faulted task has an exception");
    assert!(exception.is::<InvalidOperationError>());
    assert_status_consistent(&task);

    match task.check() {
        Err(TaskError::Faulted(e)) => assert!(e.is::<InvalidOperationError>()),
        other => panic!("expected Faulted, got {:?}", other),
    }
}

#[test]
fn test_continuation_after_completion_runs_before_return() {
    init_test_logging();
    let scheduler = deterministic();
    let task = scheduler
        .task()
        .strategy(Strategy::CurrentThread)
        .action(|| {})
        .unwrap();
    task.start();

    let caller = thread::current().id();
    let ran_on = Arc::new(Mutex::new(None));
    let slot = ran_on.clone();
    task.continue_with(move |t| {
        assert!(t.is_success());
        *slot.lock() = Some(thread::current().id());
    });
    assert_eq!(*ran_on.lock(), Some(caller));

    let hit = Arc::new(AtomicUsize::new(0));
    let h = hit.clone();
    task.on_success(move || {
        h.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(hit.load(Ordering::SeqCst), 1);
}

#[test]
fn test_continuations_fire_in_order_exactly_once() {
    init_test_logging();
    let scheduler = Scheduler::new();
    let task = scheduler
        .task()
        .strategy(Strategy::MainThread)
        .action(|| {})
        .unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..5 {
        let order = order.clone();
        task.continue_with(move |t| {
            assert!(t.is_completed());
            order.lock().push(i);
        });
    }
    let o = order.clone();
    task.on_success(move || o.lock().push(100));

    task.start();
    assert!(task.is_running());
    assert!(order.lock().is_empty());

    scheduler.tick().unwrap();
    scheduler.tick().unwrap();

    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4, 100]);
}

#[test]
fn test_background_task_runs_off_thread() {
    init_test_logging();
    let scheduler = Scheduler::with_options(SchedulerOptions {
        background_workers: 2,
        ..SchedulerOptions::default()
    });
    let caller = thread::current().id();
    let ran_on = Arc::new(Mutex::new(None));

    let slot = ran_on.clone();
    let task = scheduler
        .task()
        .action(move || {
            *slot.lock() = Some(thread::current().id());
        })
        .unwrap();
    task.start();

    // wait() from a non-main thread
    let waiter = task.clone();
    thread::spawn(move || {
        waiter.wait();
    })
    .join()
    .unwrap();

    assert!(task.is_success());
    let ran_on = ran_on.lock().expect("action ran");
    assert_ne!(ran_on, caller);
    assert_eq!(scheduler.stats().background_jobs, 1);
    assert_eq!(scheduler.stats().background_workers, 2);
}

#[test]
fn test_background_fault_does_not_escape() {
    init_test_logging();
    let scheduler = Scheduler::new();
    let task = scheduler
        .task()
        .action(|| -> Result<(), InvalidOperationError> { panic!("worker blew up") })
        .unwrap();
    task.start().wait();

    assert!(task.is_faulted());
    let exception = task.exception().unwrap();
    assert!(matches!(
        exception.downcast_ref::<TaskError>(),
        Some(TaskError::Panicked(msg)) if msg == "worker blew up"
    ));

    // the pool still serves later tasks
    let again = scheduler.task().action(|| {}).unwrap();
    again.start().wait();
    assert!(again.is_success());
}

#[test]
fn test_background_task_waits_on_nested_background_task() {
    init_test_logging();
    let scheduler = Scheduler::with_options(SchedulerOptions {
        background_workers: 1,
        ..SchedulerOptions::default()
    });

    let nested = scheduler.clone();
    let outer = scheduler
        .task()
        .action(move || -> TaskResult<()> {
            let inner = nested.task().action(|| {})?;
            inner.start().wait();
            inner.check()
        })
        .unwrap();
    outer.start();

    assert!(eventually(|| outer.is_completed()));
    assert!(outer.is_success());
    assert!(scheduler.stats().background_workers >= 2);
    assert_eq!(scheduler.stats().background_jobs, 2);
}

#[test]
fn test_single_threaded_switch_runs_inline() {
    init_test_logging();
    let scheduler = Scheduler::new();
    scheduler.set_multithreading_disabled(true);

    let caller = thread::current().id();
    let ran_on = Arc::new(Mutex::new(None));
    let slot = ran_on.clone();
    let task = scheduler
        .task()
        .strategy(Strategy::BackgroundThread)
        .action(move || {
            *slot.lock() = Some(thread::current().id());
        })
        .unwrap();
    task.start();

    assert!(task.is_success());
    assert_eq!(*ran_on.lock(), Some(caller));
    assert_eq!(scheduler.stats().background_workers, 0);
}

#[test]
fn test_main_thread_task_waited_from_worker() {
    init_test_logging();
    let scheduler = Scheduler::new();
    let task = scheduler
        .task()
        .strategy(Strategy::MainThread)
        .action(|| {})
        .unwrap();
    task.start();

    let waiter = task.clone();
    let handle = thread::spawn(move || {
        waiter.wait();
        waiter.status()
    });

    while !handle.is_finished() {
        scheduler.tick().unwrap();
        thread::sleep(std::time::Duration::from_millis(1));
    }
    assert_eq!(handle.join().unwrap(), TaskStatus::Success);
}

#[test]
fn test_parameterized_delegate_receives_parameter() {
    init_test_logging();
    let scheduler = deterministic();
    let seen = Arc::new(Mutex::new(String::new()));

    let out = seen.clone();
    let task = scheduler
        .task()
        .strategy(Strategy::CurrentThread)
        .with_param(String::from("payload"), move |p: &String| {
            *out.lock() = p.clone();
        })
        .unwrap();
    task.start();

    assert!(task.is_success());
    assert_eq!(*seen.lock(), "payload");
    assert_eq!(task.parameter_as::<String>().unwrap().as_str(), "payload");
}

#[test]
fn test_dispose_round_trip() {
    init_test_logging();
    let scheduler = deterministic();
    let runs = Arc::new(AtomicUsize::new(0));

    let r = runs.clone();
    let task = scheduler
        .task()
        .strategy(Strategy::CurrentThread)
        .with_param(7u64, move |_: &u64| -> Result<(), InvalidOperationError> {
            r.fetch_add(1, Ordering::SeqCst);
            Err(InvalidOperationError)
        })
        .unwrap();
    task.start();
    assert!(task.is_faulted());

    task.dispose();
    assert_eq!(task.status(), TaskStatus::Created);
    assert!(task.exception().is_none());
    assert!(task.parameter().is_none());
    assert_status_consistent(&task);

    // no work left: start is a no-op
    task.start();
    assert_eq!(task.status(), TaskStatus::Created);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_disposed_workless_tasks_do_not_restart() {
    init_test_logging();
    let faulted = Task::faulted(anyhow::anyhow!("boom"));
    assert!(faulted.is_faulted());
    faulted.dispose();
    faulted.start();
    assert_eq!(faulted.status(), TaskStatus::Created);
    assert!(faulted.exception().is_none());

    let source = Task::custom();
    source.start();
    assert!(source.set_success());
    source.dispose();
    source.start();
    assert_eq!(source.status(), TaskStatus::Created);
    assert!(!source.set_fault(InvalidOperationError));
    assert_eq!(source.status(), TaskStatus::Created);
    assert_status_consistent(&source);
}

#[test]
fn test_dispose_drops_pending_callbacks() {
    init_test_logging();
    let scheduler = Scheduler::new();
    let task = scheduler
        .task()
        .strategy(Strategy::MainThread)
        .action(|| {})
        .unwrap();

    let hit = Arc::new(AtomicUsize::new(0));
    let h = hit.clone();
    task.continue_with(move |_| {
        h.fetch_add(1, Ordering::SeqCst);
    });

    task.dispose();
    task.start();
    scheduler.tick().unwrap();

    assert_eq!(task.status(), TaskStatus::Created);
    assert_eq!(hit.load(Ordering::SeqCst), 0);
}

#[test]
fn test_custom_task_completed_from_other_thread() {
    init_test_logging();
    let source = Task::custom();
    source.start();

    let done = Arc::new(AtomicUsize::new(0));
    let d = done.clone();
    source.continue_with(move |t| {
        assert!(t.is_success());
        d.fetch_add(1, Ordering::SeqCst);
    });

    let completer = source.clone();
    thread::spawn(move || assert!(completer.set_success()))
        .join()
        .unwrap();

    source.wait();
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[test]
fn test_wait_returns_after_callbacks() {
    init_test_logging();
    let scheduler = Scheduler::new();
    let task = scheduler
        .task()
        .action(|| thread::sleep(std::time::Duration::from_millis(10)))
        .unwrap();

    let finished = Arc::new(AtomicUsize::new(0));
    let f = finished.clone();
    task.continue_with(move |_| {
        thread::sleep(std::time::Duration::from_millis(20));
        f.store(1, Ordering::SeqCst);
    });
    task.start();

    let waiter = task.clone();
    thread::spawn(move || {
        waiter.wait();
    })
    .join()
    .unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cooperative_wait_drives_without_blocking() {
    init_test_logging();
    let scheduler = Scheduler::new();
    let task = scheduler
        .task()
        .strategy(Strategy::MainThread)
        .action(|| {})
        .unwrap();
    task.start();

    let mut polls = 0;
    for () in task.until_complete() {
        polls += 1;
        scheduler.tick().unwrap();
        assert!(polls < 10, "task never settled");
    }
    assert_eq!(polls, 1);
    assert!(task.is_success());
}

#[test]
fn test_many_background_tasks_complete() {
    init_test_logging();
    let scheduler = Scheduler::with_options(SchedulerOptions {
        background_workers: 4,
        ..SchedulerOptions::default()
    });
    let total = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<Task> = (0..64)
        .map(|_| {
            let total = total.clone();
            let task = scheduler
                .task()
                .action(move || {
                    total.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            task.start();
            task
        })
        .collect();

    assert!(eventually(|| tasks.iter().all(Task::is_completed)));
    assert_eq!(total.load(Ordering::SeqCst), 64);
    assert!(tasks.iter().all(Task::is_success));
}

#[test]
fn test_global_builder_uses_global_scheduler() {
    init_test_logging();
    let task = Task::builder()
        .strategy(Strategy::CurrentThread)
        .action(|| {})
        .unwrap();
    let scheduler = task.scheduler().expect("bound to a scheduler");
    assert_eq!(scheduler.main_thread(), Scheduler::global().main_thread());

    task.start();
    assert!(task.is_success());
}
