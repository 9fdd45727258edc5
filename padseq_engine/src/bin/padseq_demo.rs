//! Plays a starter pattern on the default output device and walks the
//! control surface: mute, solo, a tempo change and a manual pad hit.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{env, fs};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use log::{info, warn};

use padseq_engine::{AudioOutput, EngineConfig, SampleBank, Scheduler};
use padseq_shared::{CategoryId, GridSnapshot};

const CONFIG_ENV: &str = "PADSEQ_CONFIG";
const LOG_CONFIG_ENV: &str = "PADSEQ_LOG_CONFIG";

enum TransportEvent {
    Step(usize),
    Pad(usize),
}

fn main() -> Result<()> {
    init_logging()?;
    let config = load_config()?;

    let mut bank = SampleBank::new();
    let loaded = bank.load_dir(&config.demo.sample_dir);
    if loaded == 0 {
        warn!(
            "no samples under {}; the pattern will run silent",
            config.demo.sample_dir.display()
        );
    } else {
        info!(
            "loaded {loaded} pads from {}",
            config.demo.sample_dir.display()
        );
    }

    let output = AudioOutput::new(&config.audio).context("opening audio output")?;
    let clock = Arc::new(output.stream_clock());
    let mut scheduler = Scheduler::new(clock, output.sink(), config.scheduler.tuning());
    scheduler.set_bpm(config.scheduler.bpm);
    scheduler.set_samples(bank);
    scheduler.set_grids(load_pattern(&config)?);

    let (events_tx, events_rx) = unbounded();
    let steps_tx = events_tx.clone();
    scheduler.set_callbacks(
        move |step| {
            let _ = steps_tx.send(TransportEvent::Step(step));
        },
        move |track| {
            let _ = events_tx.send(TransportEvent::Pad(track));
        },
    );

    scheduler.start()?;
    for second in 0..config.demo.run_seconds {
        match second {
            3 => {
                info!("muting drums");
                scheduler.set_muted_categories(HashSet::from([CategoryId::Drums]));
            }
            5 => {
                info!("unmuting; soloing bass track 0");
                scheduler.set_muted_categories(HashSet::new());
                scheduler.set_soloed_tracks(HashMap::from([(CategoryId::Bass, 0)]));
            }
            7 => {
                info!("clearing solo; tempo up to 160 bpm");
                scheduler.set_soloed_tracks(HashMap::new());
                scheduler.set_bpm(160.0);
            }
            8 => {
                info!("manual pad hit on Fx/0");
                scheduler.trigger_pad(0, CategoryId::Fx);
            }
            _ => {}
        }
        drain_events(&events_rx, second);
    }

    scheduler.stop();
    scheduler.destroy();
    info!("done");
    Ok(())
}

fn init_logging() -> Result<()> {
    let path = env::var(LOG_CONFIG_ENV).unwrap_or_else(|_| "log4rs.yaml".to_string());
    log4rs::init_file(&path, Default::default())
        .with_context(|| format!("initializing logging from {path}"))?;
    Ok(())
}

fn load_config() -> Result<EngineConfig> {
    let path = PathBuf::from(env::var(CONFIG_ENV).unwrap_or_else(|_| "padseq.toml".to_string()));
    if path.is_file() {
        let config = EngineConfig::from_file(&path)?;
        info!("config loaded from {}", path.display());
        Ok(config)
    } else {
        info!("no config at {}; using defaults", path.display());
        Ok(EngineConfig::default())
    }
}

fn load_pattern(config: &EngineConfig) -> Result<GridSnapshot> {
    if let Some(path) = &config.demo.pattern_file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading pattern {}", path.display()))?;
        let snapshot = serde_json::from_str(&text)
            .with_context(|| format!("parsing pattern {}", path.display()))?;
        info!("pattern loaded from {}", path.display());
        return Ok(snapshot);
    }
    Ok(starter_pattern())
}

/// Four-on-the-floor drums, an offbeat bass line and sparse chords.
fn starter_pattern() -> GridSnapshot {
    let mut snapshot = GridSnapshot::new();
    for step in [0, 4, 8, 12] {
        snapshot.set(CategoryId::Drums, 0, step, true);
    }
    for step in [4, 12] {
        snapshot.set(CategoryId::Drums, 1, step, true);
    }
    for step in (0..16).step_by(2) {
        snapshot.set(CategoryId::Drums, 2, step, true);
    }
    for step in [0, 3, 6, 10, 14] {
        snapshot.set(CategoryId::Bass, 0, step, true);
    }
    for step in [0, 8] {
        snapshot.set(CategoryId::Chords, 0, step, true);
    }
    snapshot
}

/// Collects transport events for one wall-clock second and logs a summary.
fn drain_events(events: &Receiver<TransportEvent>, second: u64) {
    let deadline = Instant::now() + Duration::from_secs(1);
    let mut steps = 0usize;
    let mut pads = 0usize;
    let mut last_step = None;
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match events.recv_timeout(deadline - now) {
            Ok(TransportEvent::Step(step)) => {
                steps += 1;
                last_step = Some(step);
            }
            Ok(TransportEvent::Pad(track)) => {
                pads += 1;
                log::debug!("pad trigger on track {track}");
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    match last_step {
        Some(step) => {
            info!("t+{second}s: {steps} step changes (now at {step}), {pads} pad triggers")
        }
        None => info!("t+{second}s: idle"),
    }
}
