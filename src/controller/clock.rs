//! Wall-clock sampling for the frame loop.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic seconds since some fixed origin
pub trait TimeSource {
    fn now(&self) -> f64;
}

/// Real time, measured from construction
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-advanced time for headless runs and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, seconds: f64) {
        self.now.set(self.now.get() + seconds.max(0.0));
    }

    pub fn set(&self, seconds: f64) {
        self.now.set(seconds);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> f64 {
        self.now.get()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn now(&self) -> f64 {
        (**self).now()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Rc<T> {
    fn now(&self) -> f64 {
        (**self).now()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Box<T> {
    fn now(&self) -> f64 {
        (**self).now()
    }
}

/// Turns successive samples of a `TimeSource` into clamped frame deltas
pub struct FrameClock<S: TimeSource> {
    source: S,
    last: f64,
    max_frame_time: f64,
}

impl<S: TimeSource> FrameClock<S> {
    pub fn new(source: S, max_frame_time: f64) -> Self {
        let last = source.now();
        Self { source, last, max_frame_time }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Restart timing, e.g. after a load so the load time isn't simulated
    pub fn reset(&mut self) {
        self.last = self.source.now();
    }

    /// Seconds since the previous tick, within `[0, max_frame_time]`
    pub fn tick(&mut self) -> f64 {
        let now = self.source.now();
        let raw = now - self.last;
        self.last = now;
        if raw > self.max_frame_time {
            tracing::debug!(raw, clamp = self.max_frame_time, "long frame clamped");
        }
        raw.clamp(0.0, self.max_frame_time)
    }
}
