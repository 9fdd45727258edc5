use std::sync::Arc;

use crate::assets::SampleAsset;

/// Destination for scheduled sample triggers.
///
/// Called from the scheduler poll thread and from `trigger_pad` on control
/// threads, so implementations must not block: enqueue the start and perform
/// it when `at_time` arrives on the shared clock. An `at_time` already in
/// the past means "start immediately".
pub trait OutputSink: Send + Sync {
    /// Start `asset` at `at_time` seconds, resampled by `rate` and scaled
    /// by `gain`.
    fn schedule_start(&self, asset: &Arc<SampleAsset>, at_time: f64, rate: f32, gain: f32);
}
