//! Scheduler configuration

use std::time::Duration;

/// Default poll interval for [`Task::wait`](crate::Task::wait)
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(5);

/// Options for constructing a [`Scheduler`](crate::Scheduler)
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Core background worker threads (0 = number of CPU cores)
    ///
    /// The pool adds threads past this while every worker is busy.
    pub background_workers: usize,

    /// Run BackgroundThread tasks inline on the starting thread
    pub single_threaded: bool,

    /// Log task faults through `tracing::error!`
    pub log_errors: bool,

    /// Sleep between polls in a blocking wait
    pub wait_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            background_workers: 0,
            single_threaded: false,
            log_errors: true,
            wait_interval: DEFAULT_WAIT_INTERVAL,
        }
    }
}

impl SchedulerOptions {
    /// Options for deterministic tests: every BackgroundThread task runs inline
    pub fn deterministic() -> Self {
        Self {
            background_workers: 1,
            single_threaded: true,
            ..Self::default()
        }
    }

    /// Defaults overlaid with `TASKWEAVE_*` environment variables
    ///
    /// - `TASKWEAVE_SINGLE_THREADED` (bool)
    /// - `TASKWEAVE_LOG_ERRORS` (bool)
    /// - `TASKWEAVE_WORKERS` (count)
    /// - `TASKWEAVE_WAIT_INTERVAL_MS` (milliseconds)
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    fn overlay<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TASKWEAVE_SINGLE_THREADED") {
            match parse_bool(&v) {
                Some(b) => self.single_threaded = b,
                None => warn_unparsed("TASKWEAVE_SINGLE_THREADED", &v),
            }
        }
        if let Some(v) = lookup("TASKWEAVE_LOG_ERRORS") {
            match parse_bool(&v) {
                Some(b) => self.log_errors = b,
                None => warn_unparsed("TASKWEAVE_LOG_ERRORS", &v),
            }
        }
        if let Some(v) = lookup("TASKWEAVE_WORKERS") {
            match v.trim().parse::<usize>() {
                Ok(n) => self.background_workers = n,
                Err(_) => warn_unparsed("TASKWEAVE_WORKERS", &v),
            }
        }
        if let Some(v) = lookup("TASKWEAVE_WAIT_INTERVAL_MS") {
            match v.trim().parse::<u64>() {
                Ok(ms) => self.wait_interval = Duration::from_millis(ms),
                Err(_) => warn_unparsed("TASKWEAVE_WAIT_INTERVAL_MS", &v),
            }
        }
        self
    }

    /// Worker count with the 0 = CPU count rule applied
    pub fn resolved_workers(&self) -> usize {
        if self.background_workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.background_workers
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn warn_unparsed(key: &str, value: &str) {
    tracing::warn!(key, value, "ignoring unparseable scheduler option");
}
