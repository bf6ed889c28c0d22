//! Frame scheduling. The engine does all of its work in one repeating tick;
//! a [`FrameScheduler`] decides when that tick runs.

use std::time::{Duration, Instant};

/// Monotonic simulated clock in milliseconds.
#[derive(Debug, Default, Clone)]
pub struct PlaybackClock {
    pub time_ms: f64,
}

impl PlaybackClock {
    pub fn reset(&mut self) {
        self.time_ms = 0.0;
    }

    pub fn advance(&mut self, delta_ms: f64) {
        self.time_ms = (self.time_ms + delta_ms).max(0.0);
    }
}

/// Timing information passed to every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTime {
    pub index: u64,
    pub now_ms: f64,
    pub delta_ms: f64,
}

/// Returned by a tick to keep or cancel the repeating callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// Runs a repeating tick until it asks to stop or the frame budget ends.
pub trait FrameScheduler {
    /// Returns the number of ticks that ran.
    fn run<F>(&mut self, tick: F) -> u64
    where
        F: FnMut(FrameTime) -> TickControl;
}

/// Deterministic scheduler that advances a simulated clock by a fixed step
/// without sleeping. Used for tests and offline runs.
#[derive(Debug, Clone)]
pub struct FixedStepScheduler {
    step_ms: f64,
    max_frames: Option<u64>,
    clock: PlaybackClock,
}

impl FixedStepScheduler {
    pub fn new(fps: f64) -> Self {
        Self {
            step_ms: 1_000.0 / fps.max(1.0),
            max_frames: None,
            clock: PlaybackClock::default(),
        }
    }

    pub fn with_max_frames(mut self, max_frames: u64) -> Self {
        self.max_frames = Some(max_frames);
        self
    }

    pub fn step_ms(&self) -> f64 {
        self.step_ms
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.time_ms
    }
}

impl FrameScheduler for FixedStepScheduler {
    fn run<F>(&mut self, mut tick: F) -> u64
    where
        F: FnMut(FrameTime) -> TickControl,
    {
        let mut index = 0;
        while self.max_frames.map_or(true, |max| index < max) {
            let delta_ms = if index == 0 { 0.0 } else { self.step_ms };
            self.clock.advance(delta_ms);

            let control = tick(FrameTime {
                index,
                now_ms: self.clock.time_ms,
                delta_ms,
            });
            index += 1;

            if control == TickControl::Stop {
                break;
            }
        }
        index
    }
}

/// Wall-clock scheduler that sleeps between ticks to hold a target rate.
#[derive(Debug, Clone)]
pub struct PacedScheduler {
    frame: Duration,
    max_frames: Option<u64>,
}

impl PacedScheduler {
    pub fn new(fps: f64) -> Self {
        Self {
            frame: Duration::from_secs_f64(1.0 / fps.max(1.0)),
            max_frames: None,
        }
    }

    pub fn with_max_frames(mut self, max_frames: u64) -> Self {
        self.max_frames = Some(max_frames);
        self
    }
}

impl FrameScheduler for PacedScheduler {
    fn run<F>(&mut self, mut tick: F) -> u64
    where
        F: FnMut(FrameTime) -> TickControl,
    {
        let start = Instant::now();
        let mut previous = start;
        let mut index = 0;

        while self.max_frames.map_or(true, |max| index < max) {
            let now = Instant::now();
            let control = tick(FrameTime {
                index,
                now_ms: now.duration_since(start).as_secs_f64() * 1_000.0,
                delta_ms: now.duration_since(previous).as_secs_f64() * 1_000.0,
            });
            previous = now;
            index += 1;

            if control == TickControl::Stop {
                break;
            }

            let deadline = start + self.frame.mul_f64(index as f64);
            if let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
                std::thread::sleep(remaining);
            }
        }
        index
    }
}
