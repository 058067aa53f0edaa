//! Reference host driver
//!
//! Embedding hosts usually call [`Scheduler::tick`] from their own per-frame
//! update. `FrameLoop` is that update loop for hosts that have none: it ticks
//! on the calling thread and sleeps out the rest of each frame.

use crate::scheduler::{Scheduler, TickReport};
use crate::task::Task;
use crate::TaskResult;
use std::thread;
use std::time::{Duration, Instant};

/// Default frame interval (60 frames per second)
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 60);

/// Fixed-rate tick loop for a scheduler's main thread
#[derive(Debug)]
pub struct FrameLoop {
    scheduler: Scheduler,
    interval: Duration,
    frames: u64,
}

impl FrameLoop {
    /// Loop at the default frame rate
    pub fn new(scheduler: Scheduler) -> Self {
        Self::with_interval(scheduler, DEFAULT_FRAME_INTERVAL)
    }

    /// Loop at `fps` frames per second (0 = unpaced)
    pub fn with_frame_rate(scheduler: Scheduler, fps: u32) -> Self {
        let interval = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / fps
        };
        Self::with_interval(scheduler, interval)
    }

    /// Loop with an explicit frame interval (zero = unpaced)
    pub fn with_interval(scheduler: Scheduler, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
            frames: 0,
        }
    }

    /// Frames run so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// The driven scheduler
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Tick once, then sleep out the remainder of the frame
    pub fn run_frame(&mut self) -> TaskResult<TickReport> {
        let started = Instant::now();
        let report = self.scheduler.tick()?;
        self.frames += 1;

        let spent = started.elapsed();
        if spent < self.interval {
            thread::sleep(self.interval - spent);
        }
        Ok(report)
    }

    /// Run `count` frames, returning the combined report
    pub fn run_frames(&mut self, count: u64) -> TaskResult<TickReport> {
        let mut total = TickReport::default();
        for _ in 0..count {
            total += self.run_frame()?;
        }
        Ok(total)
    }

    /// Run frames until `done` returns true, checked before each frame
    ///
    /// Returns the number of frames run. Loops forever if `done` never holds.
    pub fn run_until<F>(&mut self, mut done: F) -> TaskResult<u64>
    where
        F: FnMut() -> bool,
    {
        let start = self.frames;
        while !done() {
            self.run_frame()?;
        }
        Ok(self.frames - start)
    }

    /// Run frames until `task` is terminal and its callbacks have fired
    pub fn run_until_complete(&mut self, task: &Task) -> TaskResult<u64> {
        self.run_until(|| task.is_settled())
    }
}
