use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwap;
use log::{debug, info, trace, warn};
use thiserror::Error;

use padseq_shared::{
    CATEGORIES, CategoryId, GridSnapshot, MAX_BPM, MIN_BPM, NEUTRAL_BPM, STEPS_PER_PATTERN,
    TRACKS_PER_CATEGORY,
};

use crate::assets::SampleBank;
use crate::clock::ClockSource;
use crate::sink::OutputSink;

/// Seconds per step: one sixteenth note at `bpm`.
pub fn step_duration_secs(bpm: f32) -> f64 {
    60.0 / f64::from(bpm) / 4.0
}

/// Timing knobs for the lookahead loop.
///
/// Steps are pre-scheduled up to `lookahead_window` ahead of the clock; the
/// poll thread wakes every `poll_interval` to top the window up. The poll
/// interval must stay at or below half the window, otherwise a step's due
/// time can slip past a wake and fire late.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerTuning {
    pub lookahead_window: Duration,
    pub poll_interval: Duration,
}

impl Default for SchedulerTuning {
    fn default() -> Self {
        Self {
            lookahead_window: Duration::from_millis(100),
            poll_interval: Duration::from_millis(25),
        }
    }
}

/// Failures surfaced by `Scheduler::start`.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to spawn scheduler poll thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("scheduler already destroyed")]
    Destroyed,
}

type StepCallback = Box<dyn Fn(usize) + Send + Sync>;

struct Callbacks {
    on_step_change: StepCallback,
    on_pad_trigger: StepCallback,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            on_step_change: Box::new(|_| {}),
            on_pad_trigger: Box::new(|_| {}),
        }
    }
}

struct Worker {
    run: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// State shared between the control surface and the poll thread.
///
/// Pattern and routing state is published as whole snapshots behind
/// `ArcSwap`: writers build a fresh value and swap it in, the poll thread
/// loads a consistent view once per fired step and never blocks a writer.
struct SchedulerCore {
    clock: Arc<dyn ClockSource>,
    sink: Arc<dyn OutputSink>,
    tuning: SchedulerTuning,
    bpm_bits: AtomicU32,
    current_step: AtomicU32,
    playing: AtomicBool,
    destroyed: AtomicBool,
    grids: ArcSwap<GridSnapshot>,
    muted: ArcSwap<HashSet<CategoryId>>,
    soloed: ArcSwap<HashMap<CategoryId, usize>>,
    samples: ArcSwap<SampleBank>,
    callbacks: ArcSwap<Callbacks>,
    /// Orders the loop's step advance against `stop()`'s reset. The loop
    /// re-checks the run flag under this lock before advancing, and `stop`
    /// resets the step under it, so after `stop` returns the step is 0 and
    /// no late advance can overwrite it.
    advance_gate: Mutex<()>,
}

impl SchedulerCore {
    fn bpm(&self) -> f32 {
        f32::from_bits(self.bpm_bits.load(Ordering::Relaxed))
    }

    fn run_loop(&self, run: &AtomicBool) {
        let mut next_due = self.clock.now();
        debug!("scheduler loop anchored at {next_due:.3}s");
        while run.load(Ordering::Relaxed) {
            self.poll_once(run, &mut next_due);
            thread::sleep(self.tuning.poll_interval);
        }
        trace!("scheduler loop exiting");
    }

    /// One poll pass: fire every step whose due time falls inside the
    /// lookahead window, accumulating `next_due` by exact step durations so
    /// timing error never compounds. If the clock has jumped far ahead the
    /// pass catches up by firing each missed step in order.
    fn poll_once(&self, run: &AtomicBool, next_due: &mut f64) {
        let lookahead = self.tuning.lookahead_window.as_secs_f64();
        while run.load(Ordering::Relaxed) && *next_due < self.clock.now() + lookahead {
            let step = self.current_step.load(Ordering::Relaxed) as usize;
            let bpm = self.bpm();
            self.fire_step(step, *next_due, bpm);
            *next_due += step_duration_secs(bpm);
            let next = ((step + 1) % STEPS_PER_PATTERN) as u32;
            // The advance happens under the gate with the run flag
            // re-checked, so a concurrent stop() either overwrites a
            // finished advance or suppresses it; its reset always lands
            // last. The CAS keeps a concurrent set_current_step() write
            // from being overwritten by this pass.
            let advanced = {
                let _gate = self.advance_gate.lock();
                run.load(Ordering::Relaxed)
                    && self
                        .current_step
                        .compare_exchange(step as u32, next, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
            };
            if !advanced {
                break;
            }
            let callbacks = self.callbacks.load();
            (callbacks.on_step_change)(next as usize);
        }
    }

    /// Dispatches every audible cell of `step` to the sink at `at` seconds.
    fn fire_step(&self, step: usize, at: f64, bpm: f32) {
        let grids = self.grids.load();
        let muted = self.muted.load();
        let soloed = self.soloed.load();
        let samples = self.samples.load();

        for def in CATEGORIES.iter() {
            if muted.contains(&def.id) {
                continue;
            }
            let solo = soloed.get(&def.id).copied();
            let grid = grids.grid(def.id);
            for track in 0..TRACKS_PER_CATEGORY {
                if let Some(solo_track) = solo {
                    if solo_track != track {
                        continue;
                    }
                }
                if !grid.get(track, step) {
                    continue;
                }
                let asset = match samples.get(def.id, track) {
                    Some(asset) => asset,
                    None => {
                        trace!("{}/{} has no sample; trigger skipped", def.name, track);
                        continue;
                    }
                };
                let rate = playback_rate(def.id, bpm);
                self.sink.schedule_start(asset, at, rate, 1.0);
                let callbacks = self.callbacks.load();
                (callbacks.on_pad_trigger)(track);
            }
        }
    }

    fn trigger_pad(&self, track: usize, category: CategoryId) {
        if self.destroyed.load(Ordering::Relaxed) {
            return;
        }
        let samples = self.samples.load();
        let asset = match samples.get(category, track) {
            Some(asset) => asset,
            None => {
                trace!(
                    "{}/{} has no sample; pad trigger skipped",
                    category.def().name,
                    track
                );
                return;
            }
        };
        let rate = playback_rate(category, self.bpm());
        self.sink.schedule_start(asset, self.clock.now(), rate, 1.0);
        let callbacks = self.callbacks.load();
        (callbacks.on_pad_trigger)(track);
    }
}

/// Playback rate for a category at the current tempo. Tempo-following
/// categories stretch with bpm relative to the 120 neutral; drums stay
/// pitch-stable at 1.0.
fn playback_rate(category: CategoryId, bpm: f32) -> f32 {
    if category.def().rate_follows_tempo {
        bpm / NEUTRAL_BPM
    } else {
        1.0
    }
}

/// Lookahead step sequencer transport.
///
/// Owns a poll thread while playing. All control methods return without
/// blocking on audio or the poll thread; pattern, mute, solo and sample
/// updates land as atomic snapshot swaps and take effect from the next
/// scheduled step.
pub struct Scheduler {
    core: Arc<SchedulerCore>,
    worker: Option<Worker>,
    retired: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// A scheduler starts stopped, at step 0, 120 bpm, with an empty
    /// pattern and no samples.
    pub fn new(
        clock: Arc<dyn ClockSource>,
        sink: Arc<dyn OutputSink>,
        tuning: SchedulerTuning,
    ) -> Self {
        let core = SchedulerCore {
            clock,
            sink,
            tuning,
            bpm_bits: AtomicU32::new(NEUTRAL_BPM.to_bits()),
            current_step: AtomicU32::new(0),
            playing: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            grids: ArcSwap::from_pointee(GridSnapshot::new()),
            muted: ArcSwap::from_pointee(HashSet::new()),
            soloed: ArcSwap::from_pointee(HashMap::new()),
            samples: ArcSwap::from_pointee(SampleBank::new()),
            callbacks: ArcSwap::from_pointee(Callbacks::default()),
            advance_gate: Mutex::new(()),
        };
        Self {
            core: Arc::new(core),
            worker: None,
            retired: Vec::new(),
        }
    }

    /// Spawns the poll thread. Starting while already playing is a no-op;
    /// playback resumes from the current step with a fresh due-time anchor.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.core.destroyed.load(Ordering::Relaxed) {
            return Err(SchedulerError::Destroyed);
        }
        self.reap_retired();
        if self.worker.is_some() {
            return Ok(());
        }
        let tuning = self.core.tuning;
        if tuning.poll_interval > tuning.lookahead_window / 2 {
            warn!(
                "poll interval {:?} exceeds half the lookahead window {:?}; steps may fire late",
                tuning.poll_interval, tuning.lookahead_window
            );
        }
        let run = Arc::new(AtomicBool::new(true));
        let core = Arc::clone(&self.core);
        let thread_run = Arc::clone(&run);
        let handle = thread::Builder::new()
            .name("padseq-scheduler".to_string())
            .spawn(move || core.run_loop(&thread_run))?;
        self.core.playing.store(true, Ordering::Relaxed);
        info!("transport started at {:.1} bpm", self.core.bpm());
        self.worker = Some(Worker { run, handle });
        Ok(())
    }

    /// Halts scheduling and resets the step position to 0. Returns without
    /// joining the poll thread; triggers already handed to the sink still
    /// sound. Stopping while stopped is a no-op.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.run.store(false, Ordering::Relaxed);
            self.retired.push(worker.handle);
            info!("transport stopped");
        }
        self.core.playing.store(false, Ordering::Relaxed);
        // Resetting under the gate waits out any in-flight advance; every
        // later advance attempt sees the downed run flag and skips.
        {
            let _gate = self.core.advance_gate.lock();
            self.core.current_step.store(0, Ordering::Relaxed);
        }
        self.reap_retired();
    }

    /// Stops and joins every poll thread this scheduler ever spawned. Once
    /// `destroy` returns no callback runs and nothing further reaches the
    /// sink; the instance stays inert and `start` reports `Destroyed`.
    pub fn destroy(&mut self) {
        self.core.destroyed.store(true, Ordering::Relaxed);
        self.stop();
        for handle in self.retired.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.core.playing.load(Ordering::Relaxed)
    }

    pub fn current_step(&self) -> usize {
        self.core.current_step.load(Ordering::Relaxed) as usize
    }

    pub fn bpm(&self) -> f32 {
        self.core.bpm()
    }

    /// Sets the tempo, clamped to 60..=200. Takes effect for the next
    /// scheduled step; durations already handed to the sink keep the tempo
    /// they were scheduled under. Non-finite input is ignored.
    pub fn set_bpm(&self, bpm: f32) {
        if !bpm.is_finite() {
            return;
        }
        let clamped = bpm.clamp(MIN_BPM, MAX_BPM);
        self.core.bpm_bits.store(clamped.to_bits(), Ordering::Relaxed);
    }

    /// Replaces the whole pattern. The swap is atomic; the next fired step
    /// reads the new snapshot.
    pub fn set_grids(&self, snapshot: GridSnapshot) {
        self.core.grids.store(Arc::new(snapshot));
    }

    pub fn set_muted_categories(&self, muted: HashSet<CategoryId>) {
        self.core.muted.store(Arc::new(muted));
    }

    /// Solo one track per category: only that track of the category fires.
    /// Mute still wins over solo.
    pub fn set_soloed_tracks(&self, soloed: HashMap<CategoryId, usize>) {
        self.core.soloed.store(Arc::new(soloed));
    }

    pub fn set_samples(&self, bank: SampleBank) {
        self.core.samples.store(Arc::new(bank));
    }

    /// Repositions the pattern, wrapping into 0..16. While playing the loop
    /// continues from the new step at the next due time.
    pub fn set_current_step(&self, step: usize) {
        self.core
            .current_step
            .store((step % STEPS_PER_PATTERN) as u32, Ordering::Relaxed);
    }

    /// Installs both callbacks. `on_step_change` receives the step the
    /// sequencer advanced to; `on_pad_trigger` receives the track index of
    /// every dispatched trigger. Both run on the poll thread (or the caller
    /// of `trigger_pad`) and should return quickly.
    pub fn set_callbacks(
        &self,
        on_step_change: impl Fn(usize) + Send + Sync + 'static,
        on_pad_trigger: impl Fn(usize) + Send + Sync + 'static,
    ) {
        self.core.callbacks.store(Arc::new(Callbacks {
            on_step_change: Box::new(on_step_change),
            on_pad_trigger: Box::new(on_pad_trigger),
        }));
    }

    /// Plays a pad right now, bypassing the grid and any mute or solo
    /// state. Works while stopped; does not touch the step position.
    pub fn trigger_pad(&self, track: usize, category: CategoryId) {
        self.core.trigger_pad(track, category);
    }

    fn reap_retired(&mut self) {
        let mut still_running = Vec::new();
        for handle in self.retired.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                still_running.push(handle);
            }
        }
        self.retired = still_running;
    }

    /// Runs one poll pass synchronously; lets tests drive the transport
    /// with a hand-advanced clock instead of the poll thread.
    #[cfg(test)]
    pub(crate) fn pump(&self, next_due: &mut f64) {
        let run = AtomicBool::new(true);
        self.core.poll_once(&run, next_due);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.destroy();
    }
}
