//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

static INIT_LOGGING: Once = Once::new();

/// Install a test-writer tracing subscriber once per test binary
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Poll `cond` until it holds or five seconds pass
pub fn eventually(cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(5) {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}
