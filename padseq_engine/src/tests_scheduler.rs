//! End-to-end transport behavior, driven either synchronously through a
//! hand-advanced clock or through the real poll thread.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};

use padseq_shared::{CategoryId, GridSnapshot};

use crate::clock::{ClockSource, ManualClock};
use crate::scheduler::{Scheduler, SchedulerError, SchedulerTuning};
use crate::test_support::{CollectingSink, full_bank, slot_id};

fn rig() -> (Arc<ManualClock>, Arc<CollectingSink>, Scheduler) {
    let clock = Arc::new(ManualClock::new());
    let sink = Arc::new(CollectingSink::new());
    let scheduler = Scheduler::new(clock.clone(), sink.clone(), SchedulerTuning::default());
    scheduler.set_samples(full_bank());
    (clock, sink, scheduler)
}

fn grid_with(category: CategoryId, track: usize, steps: &[usize]) -> GridSnapshot {
    let mut snapshot = GridSnapshot::new();
    for &step in steps {
        snapshot.set(category, track, step, true);
    }
    snapshot
}

fn every_step(category: CategoryId, track: usize) -> GridSnapshot {
    let steps: Vec<usize> = (0..16).collect();
    grid_with(category, track, &steps)
}

/// Pumps the scheduler the way the poll thread would: one pass every 25 ms
/// of simulated time.
fn drive(scheduler: &Scheduler, clock: &ManualClock, next_due: &mut f64, seconds: f64) {
    let ticks = (seconds / 0.025).round() as usize;
    for _ in 0..ticks {
        scheduler.pump(next_due);
        clock.advance(0.025);
    }
}

/// How long the poll-thread tests wait for a step event before declaring
/// the loop dead.
const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// How long they listen for a step event that must not arrive.
const QUIET_WINDOW: Duration = Duration::from_millis(200);

/// Rig for the tests that exercise the real poll thread: a drum cell on
/// every step and the step-change callback bridged onto a channel.
fn threaded_rig() -> (Arc<ManualClock>, Arc<CollectingSink>, Scheduler, Receiver<usize>) {
    let (clock, sink, scheduler) = rig();
    scheduler.set_grids(every_step(CategoryId::Drums, 0));
    let (step_tx, step_rx) = unbounded();
    scheduler.set_callbacks(
        move |step| {
            let _ = step_tx.send(step);
        },
        |_| {},
    );
    (clock, sink, scheduler, step_rx)
}

#[test]
fn eighty_steps_in_ten_seconds_without_drift() {
    let (clock, sink, scheduler) = rig();
    scheduler.set_grids(every_step(CategoryId::Drums, 0));
    let steps = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&steps);
    scheduler.set_callbacks(move |step| seen.lock().unwrap().push(step), |_| {});

    // 10 seconds of schedule: pump until the lookahead window reaches 10.0
    let mut next_due = clock.now();
    drive(&scheduler, &clock, &mut next_due, 9.9);

    let calls = sink.calls();
    assert_eq!(calls.len(), 80);
    for (n, call) in calls.iter().enumerate() {
        let expected = n as f64 * 0.125;
        assert!(
            (call.at - expected).abs() < 1.0e-9,
            "call {n} due at {} expected {expected}",
            call.at
        );
        assert_eq!(call.gain, 1.0);
    }

    let steps = steps.lock().unwrap();
    assert_eq!(steps.len(), 80);
    for (n, &step) in steps.iter().enumerate() {
        assert_eq!(step, (n + 1) % 16, "advance {n} landed on the wrong step");
    }
}

#[test]
fn clock_stall_catches_up_in_order() {
    let (clock, sink, scheduler) = rig();
    scheduler.set_grids(every_step(CategoryId::Drums, 0));
    let mut next_due = clock.now();

    scheduler.pump(&mut next_due);
    assert_eq!(sink.len(), 1);

    // one second passes without a single poll
    clock.advance(1.0);
    scheduler.pump(&mut next_due);

    let calls = sink.calls();
    assert_eq!(calls.len(), 9);
    for (n, call) in calls.iter().enumerate() {
        assert!((call.at - n as f64 * 0.125).abs() < 1.0e-9);
    }
    assert_eq!(scheduler.current_step(), 9);
}

#[test]
fn muted_category_stops_firing_from_next_step() {
    let (clock, sink, scheduler) = rig();
    let mut snapshot = every_step(CategoryId::Drums, 0);
    for step in 0..16 {
        snapshot.set(CategoryId::Bass, 2, step, true);
    }
    scheduler.set_grids(snapshot);
    let mut next_due = clock.now();

    drive(&scheduler, &clock, &mut next_due, 0.5);
    let drums = slot_id(CategoryId::Drums, 0);
    let bass = slot_id(CategoryId::Bass, 2);
    assert!(sink.calls().iter().any(|c| c.asset_id == drums));
    assert!(sink.calls().iter().any(|c| c.asset_id == bass));

    scheduler.set_muted_categories(HashSet::from([CategoryId::Drums]));
    sink.clear();
    drive(&scheduler, &clock, &mut next_due, 1.0);
    assert!(!sink.calls().is_empty());
    assert!(sink.calls().iter().all(|c| c.asset_id == bass));

    scheduler.set_muted_categories(HashSet::new());
    sink.clear();
    drive(&scheduler, &clock, &mut next_due, 1.0);
    assert!(sink.calls().iter().any(|c| c.asset_id == drums));
}

#[test]
fn solo_restricts_category_to_one_track() {
    let (clock, sink, scheduler) = rig();
    let mut snapshot = GridSnapshot::new();
    for step in 0..16 {
        snapshot.set(CategoryId::Bass, 1, step, true);
        snapshot.set(CategoryId::Bass, 3, step, true);
        snapshot.set(CategoryId::Keys, 0, step, true);
    }
    scheduler.set_grids(snapshot);
    scheduler.set_soloed_tracks(HashMap::from([(CategoryId::Bass, 3)]));
    let mut next_due = clock.now();

    drive(&scheduler, &clock, &mut next_due, 1.0);
    let calls = sink.calls();
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|c| c.asset_id != slot_id(CategoryId::Bass, 1)));
    assert!(calls.iter().any(|c| c.asset_id == slot_id(CategoryId::Bass, 3)));
    // other categories are unaffected by a bass solo
    assert!(calls.iter().any(|c| c.asset_id == slot_id(CategoryId::Keys, 0)));
}

#[test]
fn mute_wins_over_solo() {
    let (clock, sink, scheduler) = rig();
    scheduler.set_grids(every_step(CategoryId::Bass, 1));
    scheduler.set_soloed_tracks(HashMap::from([(CategoryId::Bass, 1)]));
    scheduler.set_muted_categories(HashSet::from([CategoryId::Bass]));
    let mut next_due = clock.now();

    drive(&scheduler, &clock, &mut next_due, 1.0);
    assert!(sink.calls().is_empty());
}

#[test]
fn pattern_swap_applies_to_next_fired_step() {
    let (clock, sink, scheduler) = rig();
    scheduler.set_grids(every_step(CategoryId::Drums, 0));
    let mut next_due = clock.now();

    drive(&scheduler, &clock, &mut next_due, 0.25);
    assert!(!sink.calls().is_empty());

    scheduler.set_grids(every_step(CategoryId::Keys, 5));
    sink.clear();
    drive(&scheduler, &clock, &mut next_due, 0.5);
    let keys = slot_id(CategoryId::Keys, 5);
    assert!(!sink.calls().is_empty());
    assert!(sink.calls().iter().all(|c| c.asset_id == keys));
}

#[test]
fn tempo_change_reshapes_the_following_steps() {
    let (clock, sink, scheduler) = rig();
    scheduler.set_grids(every_step(CategoryId::Drums, 0));
    let mut next_due = clock.now();

    scheduler.pump(&mut next_due);
    assert_eq!(sink.len(), 1);
    scheduler.set_bpm(160.0);
    drive(&scheduler, &clock, &mut next_due, 1.0);

    let calls = sink.calls();
    assert!(calls.len() > 3);
    let first_gap = calls[1].at - calls[0].at;
    assert!((first_gap - 0.125).abs() < 1.0e-9, "gap scheduled under the old tempo");
    for pair in calls[1..].windows(2) {
        let gap = pair[1].at - pair[0].at;
        assert!((gap - 0.09375).abs() < 1.0e-9, "gap {gap} expected 160 bpm spacing");
    }
}

#[test]
fn tempo_following_categories_stretch_with_bpm() {
    let (clock, sink, scheduler) = rig();
    let mut snapshot = every_step(CategoryId::Bass, 3);
    for step in 0..16 {
        snapshot.set(CategoryId::Drums, 0, step, true);
    }
    scheduler.set_grids(snapshot);
    scheduler.set_bpm(160.0);
    let mut next_due = clock.now();

    drive(&scheduler, &clock, &mut next_due, 0.5);
    let bass = slot_id(CategoryId::Bass, 3);
    let drums = slot_id(CategoryId::Drums, 0);
    for call in sink.calls() {
        if call.asset_id == bass {
            assert!((call.rate - 160.0 / 120.0).abs() < 1.0e-6);
        } else if call.asset_id == drums {
            assert_eq!(call.rate, 1.0);
        }
    }
}

#[test]
fn trigger_pad_bypasses_grid_mute_and_solo() {
    let (clock, sink, scheduler) = rig();
    scheduler.set_muted_categories(HashSet::from([CategoryId::Drums]));
    scheduler.set_soloed_tracks(HashMap::from([(CategoryId::Bass, 5)]));
    let pads = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&pads);
    scheduler.set_callbacks(|_| {}, move |track| seen.lock().unwrap().push(track));
    clock.advance(1.5);

    scheduler.trigger_pad(2, CategoryId::Drums);
    scheduler.set_bpm(90.0);
    scheduler.trigger_pad(7, CategoryId::Keys);

    let calls = sink.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].asset_id, slot_id(CategoryId::Drums, 2));
    assert!((calls[0].at - 1.5).abs() < 1.0e-9);
    assert_eq!(calls[0].rate, 1.0);
    assert_eq!(calls[1].asset_id, slot_id(CategoryId::Keys, 7));
    assert!((calls[1].rate - 0.75).abs() < 1.0e-6);
    assert_eq!(*pads.lock().unwrap(), vec![2, 7]);
    // a pad hit never moves the transport
    assert_eq!(scheduler.current_step(), 0);
    assert!(!scheduler.is_playing());
}

#[test]
fn trigger_pad_without_sample_stays_silent() {
    let clock = Arc::new(ManualClock::new());
    let sink = Arc::new(CollectingSink::new());
    let scheduler = Scheduler::new(clock, sink.clone(), SchedulerTuning::default());
    let pads = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&pads);
    scheduler.set_callbacks(|_| {}, move |track| seen.lock().unwrap().push(track));

    scheduler.trigger_pad(0, CategoryId::Drums);
    assert!(sink.calls().is_empty());
    assert!(pads.lock().unwrap().is_empty());
}

#[test]
fn unloaded_slot_does_not_silence_its_siblings() {
    let clock = Arc::new(ManualClock::new());
    let sink = Arc::new(CollectingSink::new());
    let scheduler = Scheduler::new(clock.clone(), sink.clone(), SchedulerTuning::default());
    // only track 4 has a sample; tracks 2 and 6 are active but unloaded
    let mut bank = crate::assets::SampleBank::new();
    bank.insert_pcm(CategoryId::Drums, 4, "snare".into(), vec![0.0; 8], 1, 48000);
    scheduler.set_samples(bank);
    let mut snapshot = GridSnapshot::new();
    for track in [2, 4, 6] {
        snapshot.set(CategoryId::Drums, track, 0, true);
    }
    scheduler.set_grids(snapshot);
    let mut next_due = clock.now();

    scheduler.pump(&mut next_due);
    let calls = sink.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].asset_id, 1);
    assert_eq!(scheduler.current_step(), 1);
}

#[test]
fn empty_bank_advances_without_sound() {
    let clock = Arc::new(ManualClock::new());
    let sink = Arc::new(CollectingSink::new());
    let scheduler = Scheduler::new(clock.clone(), sink.clone(), SchedulerTuning::default());
    scheduler.set_grids(every_step(CategoryId::Drums, 0));
    let steps = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&steps);
    scheduler.set_callbacks(move |step| seen.lock().unwrap().push(step), |_| {});
    let mut next_due = clock.now();

    drive(&scheduler, &clock, &mut next_due, 1.0);
    assert!(sink.calls().is_empty());
    assert!(!steps.lock().unwrap().is_empty());
}

#[test]
fn reposition_while_running_continues_from_new_step() {
    let (clock, _sink, scheduler) = rig();
    scheduler.set_grids(every_step(CategoryId::Drums, 0));
    let steps = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&steps);
    scheduler.set_callbacks(move |step| seen.lock().unwrap().push(step), |_| {});
    let mut next_due = clock.now();

    scheduler.pump(&mut next_due);
    scheduler.set_current_step(8);
    clock.advance(0.125);
    scheduler.pump(&mut next_due);

    assert_eq!(*steps.lock().unwrap(), vec![1, 9]);
}

#[test]
fn start_stop_resets_the_transport() {
    let (clock, sink, mut scheduler, steps) = threaded_rig();

    scheduler.start().unwrap();
    assert!(scheduler.is_playing());
    assert_eq!(steps.recv_timeout(STEP_TIMEOUT).unwrap(), 1, "loop never anchored");

    clock.advance(1.0);
    for expected in 2..=9 {
        assert_eq!(steps.recv_timeout(STEP_TIMEOUT).unwrap(), expected);
    }
    scheduler.stop();
    assert!(!scheduler.is_playing());
    assert_eq!(scheduler.current_step(), 0);

    // the retired loop exits within one poll interval; a clock jump after
    // the quiet window must not produce another step
    assert!(steps.recv_timeout(QUIET_WINDOW).is_err());
    clock.advance(5.0);
    assert!(steps.recv_timeout(QUIET_WINDOW).is_err());
    assert_eq!(sink.len(), 9, "stopped transport kept scheduling");
}

#[test]
fn restart_anchors_at_the_current_clock() {
    let (clock, sink, mut scheduler, steps) = threaded_rig();

    scheduler.start().unwrap();
    assert_eq!(steps.recv_timeout(STEP_TIMEOUT).unwrap(), 1);
    scheduler.stop();
    assert!(steps.recv_timeout(QUIET_WINDOW).is_err());
    sink.clear();

    clock.advance(2.0);
    scheduler.start().unwrap();
    assert_eq!(steps.recv_timeout(STEP_TIMEOUT).unwrap(), 1, "restart never fired");
    let call = sink.calls()[0].clone();
    // no backlog from the stopped span; the first step fires at restart time
    assert!((call.at - 2.0).abs() < 1.0e-9);
    assert_eq!(call.asset_id, slot_id(CategoryId::Drums, 0));
    scheduler.destroy();
}

#[test]
fn second_start_does_not_add_a_loop() {
    let (_clock, sink, mut scheduler, steps) = threaded_rig();

    scheduler.start().unwrap();
    scheduler.start().unwrap();
    assert_eq!(steps.recv_timeout(STEP_TIMEOUT).unwrap(), 1);
    // a second loop would have fired the anchor step twice
    assert!(steps.recv_timeout(QUIET_WINDOW).is_err());
    assert_eq!(sink.len(), 1);
    scheduler.destroy();
}

#[test]
fn stop_always_lands_on_step_zero() {
    let (clock, _sink, mut scheduler, steps) = threaded_rig();

    // stop() racing the loop's advance must never leave the step off 0;
    // vary the phase so some rounds overlap mid-advance
    for round in 0..25 {
        scheduler.start().unwrap();
        if round % 2 == 0 {
            let _ = steps.recv_timeout(STEP_TIMEOUT);
        }
        clock.advance(0.125);
        scheduler.stop();
        assert_eq!(scheduler.current_step(), 0, "round {round}");
        while steps.try_recv().is_ok() {}
    }
    scheduler.destroy();
}

#[test]
fn destroy_silences_everything() {
    let (clock, sink, mut scheduler, steps) = threaded_rig();

    scheduler.start().unwrap();
    assert_eq!(steps.recv_timeout(STEP_TIMEOUT).unwrap(), 1);
    scheduler.destroy();
    let after_destroy = sink.len();

    clock.advance(10.0);
    assert!(steps.recv_timeout(QUIET_WINDOW).is_err());
    assert_eq!(sink.len(), after_destroy);
    assert!(!scheduler.is_playing());

    scheduler.trigger_pad(0, CategoryId::Drums);
    assert_eq!(sink.len(), after_destroy);
    assert!(matches!(scheduler.start(), Err(SchedulerError::Destroyed)));
}

#[test]
fn drop_joins_the_poll_thread() {
    let (clock, sink, mut scheduler, steps) = threaded_rig();
    scheduler.start().unwrap();
    assert_eq!(steps.recv_timeout(STEP_TIMEOUT).unwrap(), 1);

    drop(scheduler);
    clock.advance(10.0);
    // the drop joined the loop and released the callback sender, so this
    // recv reports disconnect rather than a late step
    assert!(steps.recv_timeout(QUIET_WINDOW).is_err());
    assert_eq!(sink.len(), 1);
}
