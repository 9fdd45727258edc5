pub mod assets;
pub mod clock;
pub mod config;
pub mod output;
pub mod scheduler; // the lookahead transport lives here
pub mod sink;

// Re-exports
pub use assets::{SampleAsset, SampleBank};
pub use clock::{ClockSource, ManualClock, SystemClock};
pub use config::{AudioConfig, DemoConfig, EngineConfig, SchedulerConfig};
pub use output::{AudioOutput, StreamClock, StreamSink};
pub use scheduler::{Scheduler, SchedulerError, SchedulerTuning, step_duration_secs};
pub use sink::OutputSink;

#[cfg(test)]
mod tests_scheduler;
