//! Frame-paced tick planning with bounded catch-up.

use std::time::Duration;

/// Default cap on ticks run in a single frame.
pub const MAX_TICKS_PER_FRAME: usize = 4;

/// Highest frame rate a host may request.
pub const MAX_TARGET_FPS: f64 = 1_000.0;

const FPS_SMOOTHING: f64 = 0.1;

/// How many ticks a frame should run, and how many were dropped to keep up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramePlan {
    pub ticks: usize,
    pub skipped: usize,
}

/// Accumulates frame time and converts it into whole simulation ticks.
#[derive(Debug, Clone)]
pub struct TickDriver {
    tick_interval: f64,
    max_ticks_per_frame: usize,
    accumulator: f64,
    speed: f64,
    paused: bool,
    fps: f64,
    total_skipped: u64,
}

impl TickDriver {
    #[must_use]
    pub fn new(target_fps: f64, max_ticks_per_frame: usize) -> Self {
        let target_fps = if target_fps.is_finite() && target_fps > 0.0 {
            target_fps
        } else {
            60.0
        };
        Self {
            tick_interval: 1.0 / target_fps,
            max_ticks_per_frame: max_ticks_per_frame.max(1),
            accumulator: 0.0,
            speed: 1.0,
            paused: false,
            fps: target_fps,
            total_skipped: 0,
        }
    }

    /// Seconds of frame time that make up one tick.
    #[must_use]
    pub const fn tick_interval(&self) -> f64 {
        self.tick_interval
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if paused {
            self.accumulator = 0.0;
        }
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = if speed.is_finite() { speed.max(0.0) } else { 1.0 };
    }

    /// Exponentially smoothed frames per second.
    #[must_use]
    pub const fn fps(&self) -> f64 {
        self.fps
    }

    #[must_use]
    pub const fn total_skipped(&self) -> u64 {
        self.total_skipped
    }

    /// Plan the ticks for a frame that took `elapsed`.
    pub fn plan(&mut self, elapsed: Duration) -> FramePlan {
        let seconds = elapsed.as_secs_f64();
        if seconds > 0.0 {
            let instant = 1.0 / seconds;
            self.fps += (instant - self.fps) * FPS_SMOOTHING;
        }
        if self.paused || self.speed <= f64::EPSILON {
            return FramePlan::default();
        }

        self.accumulator += seconds * self.speed;
        let due = (self.accumulator / self.tick_interval).floor();
        let due = if due.is_finite() { due as usize } else { 0 };
        let ticks = due.min(self.max_ticks_per_frame);
        let skipped = due - ticks;
        self.accumulator -= self.tick_interval * due as f64;
        if self.accumulator < 0.0 {
            self.accumulator = 0.0;
        }
        self.total_skipped += skipped as u64;
        FramePlan { ticks, skipped }
    }
}
