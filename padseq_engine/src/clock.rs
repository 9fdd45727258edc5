use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic time source the scheduler runs against, in seconds.
///
/// The epoch is arbitrary but fixed for the lifetime of the clock. A clock
/// derived from the output device's frame counter (`output::StreamClock`)
/// keeps scheduled times locked to audible playback; `SystemClock` is the
/// fallback for hosts without an audio-domain clock.
pub trait ClockSource: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall-time clock anchored at construction.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-advanced clock for deterministic tests. Time only moves when
/// `advance` is called.
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            nanos: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, seconds: f64) {
        let nanos = (seconds * 1.0e9).round() as u64;
        self.nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> f64 {
        self.nanos.load(Ordering::Relaxed) as f64 / 1.0e9
    }
}
