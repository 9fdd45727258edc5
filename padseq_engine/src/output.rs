use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, info, warn};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};

use crate::assets::SampleAsset;
use crate::clock::ClockSource;
use crate::config::AudioConfig;
use crate::sink::OutputSink;

const VOICE_QUEUE_CAPACITY: usize = 256;
const MAX_ACTIVE_VOICES: usize = 128;

/// One pending or sounding trigger inside the audio callback.
struct Voice {
    asset: Arc<SampleAsset>,
    /// Absolute output frame the voice starts on.
    start_frame: u64,
    /// Asset frames consumed per output frame; folds together the
    /// requested rate and the asset/device sample rate ratio.
    step: f64,
    gain: f32,
    position: f64,
    started: bool,
}

impl Voice {
    fn is_done(&self) -> bool {
        self.position >= self.asset.frames() as f64
    }

    /// Adds this voice into an output buffer spanning absolute frames
    /// `[buffer_start, buffer_start + frames)`. A start frame already in
    /// the past begins at the top of the buffer.
    fn mix_into(&mut self, data: &mut [f32], channels: usize, buffer_start: u64, frames: usize) {
        let first = if self.started || self.start_frame <= buffer_start {
            0
        } else if self.start_frame < buffer_start + frames as u64 {
            (self.start_frame - buffer_start) as usize
        } else {
            return;
        };
        self.started = true;

        let total = self.asset.frames();
        for frame in first..frames {
            let index = self.position as usize;
            if index >= total {
                break;
            }
            let next = (index + 1).min(total - 1);
            let t = (self.position - index as f64) as f32;
            let (l0, r0) = self.asset_frame(index);
            let (l1, r1) = self.asset_frame(next);
            let l = (l0 + (l1 - l0) * t) * self.gain;
            let r = (r0 + (r1 - r0) * t) * self.gain;
            data[frame * channels] += l;
            if channels > 1 {
                data[frame * channels + 1] += r;
            }
            self.position += self.step;
        }
    }

    fn asset_frame(&self, frame: usize) -> (f32, f32) {
        let channels = self.asset.channels as usize;
        let index = frame * channels;
        let l = self.asset.data.get(index).copied().unwrap_or(0.0);
        let r = if channels > 1 {
            self.asset.data.get(index + 1).copied().unwrap_or(0.0)
        } else {
            l
        };
        (l, r)
    }
}

fn render_voices(active: &mut Vec<Voice>, data: &mut [f32], channels: usize, buffer_start: u64) {
    let frames = data.len() / channels;
    for voice in active.iter_mut() {
        voice.mix_into(data, channels, buffer_start, frames);
    }
    active.retain(|voice| !voice.is_done());
}

/// Requested buffer size squared against what the device reports. Out of
/// range requests are clamped rather than handed to the device, which
/// would refuse them and kill the stream; without a reported range the
/// device's own default is the only safe choice.
fn pick_buffer_size(requested: u32, supported: cpal::SupportedBufferSize) -> cpal::BufferSize {
    match supported {
        cpal::SupportedBufferSize::Range { min, max } => {
            let frames = requested.clamp(min, max);
            if frames != requested {
                warn!("buffer size {requested} outside supported {min}..{max}; using {frames}");
            }
            cpal::BufferSize::Fixed(frames)
        }
        cpal::SupportedBufferSize::Unknown => {
            debug!("device reports no buffer size range; using its default");
            cpal::BufferSize::Default
        }
    }
}

/// Clock derived from the output stream's frame counter.
///
/// Advances only as the device consumes frames, so times scheduled against
/// it cannot drift relative to audible playback.
#[derive(Clone)]
pub struct StreamClock {
    frames: Arc<AtomicU64>,
    sample_rate: f64,
}

impl ClockSource for StreamClock {
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Relaxed) as f64 / self.sample_rate
    }
}

/// Send-safe scheduling handle onto a running output stream. Triggers are
/// pushed to a lock-free queue the audio callback drains; a full queue
/// drops the trigger with a warning rather than blocking the caller.
pub struct StreamSink {
    queue: Mutex<HeapProd<Voice>>,
    sample_rate: f64,
}

impl OutputSink for StreamSink {
    fn schedule_start(&self, asset: &Arc<SampleAsset>, at_time: f64, rate: f32, gain: f32) {
        let rate = if rate > 0.0 { rate } else { 1.0 };
        let voice = Voice {
            asset: Arc::clone(asset),
            start_frame: (at_time.max(0.0) * self.sample_rate).round() as u64,
            step: f64::from(rate) * f64::from(asset.sample_rate) / self.sample_rate,
            gain,
            position: 0.0,
            started: false,
        };
        if let Ok(mut queue) = self.queue.lock() {
            if queue.try_push(voice).is_err() {
                warn!("voice queue full; dropping a trigger");
            }
        }
    }
}

/// Default output device wrapped as a scheduler sink.
///
/// Owns the cpal stream, which is not `Send`; keep it on the host thread
/// and hand `sink()` and `stream_clock()` to the scheduler.
pub struct AudioOutput {
    _stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
    frames: Arc<AtomicU64>,
    sink: Arc<StreamSink>,
}

impl AudioOutput {
    pub fn new(cfg: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no output device available"))?;
        let name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
        let supported = device.default_output_config()?;
        let sample_rate = supported.sample_rate();
        let channels = supported.channels();
        let sample_format = supported.sample_format();
        info!("output device {name}: {sample_rate} Hz, {channels} ch, {sample_format:?}");
        let supported_buffer = *supported.buffer_size();
        if let cpal::SupportedBufferSize::Range { min, max } = supported_buffer {
            debug!("device supports {min}..{max} frames per buffer");
        }

        let mut stream_config: cpal::StreamConfig = supported.into();
        stream_config.buffer_size = pick_buffer_size(cfg.buffer_size, supported_buffer);

        let frames = Arc::new(AtomicU64::new(0));
        let frames_cb = Arc::clone(&frames);
        let (producer, mut consumer) = HeapRb::<Voice>::new(VOICE_QUEUE_CAPACITY).split();
        let mut active: Vec<Voice> = Vec::with_capacity(MAX_ACTIVE_VOICES);
        let channel_count = channels as usize;

        let err_fn = |err: cpal::StreamError| {
            let msg = err.to_string();
            // ALSA surfaces every under/overrun as a stream error; one log
            // line each would swamp the output.
            if msg.contains("underrun") || msg.contains("overrun") {
                return;
            }
            warn!("audio stream error: {msg}");
        };

        let stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let buffer_start = frames_cb.load(Ordering::Relaxed);
                    data.fill(0.0);
                    while let Some(voice) = consumer.try_pop() {
                        if active.len() == MAX_ACTIVE_VOICES {
                            // steal the oldest voice rather than grow
                            active.remove(0);
                        }
                        active.push(voice);
                    }
                    render_voices(&mut active, data, channel_count, buffer_start);
                    let rendered = (data.len() / channel_count) as u64;
                    frames_cb.store(buffer_start + rendered, Ordering::Relaxed);
                },
                err_fn,
                None,
            )?,
            format => return Err(anyhow!("unsupported output sample format {format:?}")),
        };
        stream.play()?;

        let sink = Arc::new(StreamSink {
            queue: Mutex::new(producer),
            sample_rate: f64::from(sample_rate),
        });

        Ok(Self {
            _stream: stream,
            sample_rate,
            channels,
            frames,
            sink,
        })
    }

    /// Scheduling handle to pass to `Scheduler::new`.
    pub fn sink(&self) -> Arc<StreamSink> {
        Arc::clone(&self.sink)
    }

    /// Audio-domain clock to pass to `Scheduler::new`.
    pub fn stream_clock(&self) -> StreamClock {
        StreamClock {
            frames: Arc::clone(&self.frames),
            sample_rate: f64::from(self.sample_rate),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}
