use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::scheduler::SchedulerTuning;

/// Engine configuration, deserialized from TOML. Every field has a default
/// so a partial file or an empty table still yields a working setup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub audio: AudioConfig,
    pub demo: DemoConfig,
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub lookahead_ms: u64,
    pub poll_interval_ms: u64,
    pub bpm: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: 100,
            poll_interval_ms: 25,
            bpm: 120.0,
        }
    }
}

impl SchedulerConfig {
    pub fn tuning(&self) -> SchedulerTuning {
        SchedulerTuning {
            lookahead_window: Duration::from_millis(self.lookahead_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Requested device buffer size in frames.
    pub buffer_size: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { buffer_size: 512 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Root of the sample library, laid out as `<dir>/<category>/padNN.wav`.
    pub sample_dir: PathBuf,
    /// Optional JSON pattern to load instead of the built-in one.
    pub pattern_file: Option<PathBuf>,
    pub run_seconds: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            sample_dir: PathBuf::from("samples"),
            pattern_file: None,
            run_seconds: 12,
        }
    }
}
