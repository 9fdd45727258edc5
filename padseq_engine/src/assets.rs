use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};

use padseq_shared::{CATEGORIES, CategoryId, TRACKS_PER_CATEGORY};

/// Decoded sample ready for playback.
pub struct SampleAsset {
    pub id: u32,
    pub name: String,
    /// Interleaved samples, `channels` per frame.
    pub data: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    pub duration_seconds: f64,
}

impl SampleAsset {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.data.len() / self.channels as usize
        }
    }
}

/// Set of loaded pads keyed by `(category, track)`.
///
/// A bank is built or reloaded off the scheduler thread and then published
/// whole through `Scheduler::set_samples`; lookups on the live snapshot are
/// infallible, an unloaded slot simply yields `None`.
#[derive(Clone)]
pub struct SampleBank {
    slots: HashMap<(CategoryId, usize), Arc<SampleAsset>>,
    next_id: u32,
}

impl SampleBank {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn get(&self, category: CategoryId, track: usize) -> Option<&Arc<SampleAsset>> {
        self.slots.get(&(category, track))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Registers already-decoded PCM under a pad slot and returns its id.
    pub fn insert_pcm(
        &mut self,
        category: CategoryId,
        track: usize,
        name: String,
        data: Vec<f32>,
        channels: u16,
        sample_rate: u32,
    ) -> u32 {
        let frames = if channels == 0 {
            0
        } else {
            data.len() / channels as usize
        };
        let duration_seconds = if sample_rate == 0 {
            0.0
        } else {
            frames as f64 / f64::from(sample_rate)
        };
        let id = self.next_id;
        self.next_id += 1;
        let asset = SampleAsset {
            id,
            name,
            data,
            channels,
            sample_rate,
            duration_seconds,
        };
        self.slots.insert((category, track), Arc::new(asset));
        id
    }

    /// Decodes one WAV file into a pad slot.
    pub fn load_slot(&mut self, category: CategoryId, track: usize, path: &Path) -> Result<u32> {
        let (data, channels, sample_rate) = decode_wav(path)?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = self.insert_pcm(category, track, name, data, channels, sample_rate);
        debug!(
            "loaded {} into {}/{}",
            path.display(),
            category.def().name,
            track
        );
        Ok(id)
    }

    /// Scans `<root>/<category>/padNN.wav` for every category and pad number
    /// 01..=12. Absent files are skipped quietly; files that fail to decode
    /// are logged and skipped. Returns how many pads were loaded.
    pub fn load_dir(&mut self, root: &Path) -> usize {
        let mut loaded = 0;
        for def in CATEGORIES.iter() {
            let dir = root.join(def.name);
            if !dir.is_dir() {
                debug!("no sample directory at {}", dir.display());
                continue;
            }
            for track in 0..TRACKS_PER_CATEGORY {
                let path = dir.join(format!("pad{:02}.wav", track + 1));
                if !path.is_file() {
                    continue;
                }
                match self.load_slot(def.id, track, &path) {
                    Ok(_) => loaded += 1,
                    Err(err) => warn!("skipping {}: {err:#}", path.display()),
                }
            }
        }
        loaded
    }
}

impl Default for SampleBank {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_wav(path: &Path) -> Result<(Vec<f32>, u16, u32)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let data: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = 2_f32.powi(i32::from(spec.bits_per_sample) - 1);
            reader
                .samples::<i32>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / scale)
                .collect()
        }
        hound::SampleFormat::Float => reader.samples::<f32>().filter_map(|s| s.ok()).collect(),
    };
    Ok((data, spec.channels, spec.sample_rate))
}
