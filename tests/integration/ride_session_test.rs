//! Ride recording flow, checkpointing and crash recovery.

use crate::mock_transport::{handshake, notification, MockTransport};
use ridelink::metrics::geo::equator_degrees_for;
use ridelink::recording::clock::ManualClock;
use ridelink::recording::session::{RideSession, SessionConfig};
use ridelink::recording::types::{LocationFix, RecordingState};
use ridelink::sensors::coordinator::ScanCoordinator;
use ridelink::sensors::types::{SensorConnectionState, SensorKind};
use ridelink::state::RideRepository;
use ridelink::storage::kv::MemoryStore;
use ridelink::storage::ride_state::RideStateStore;
use std::sync::Arc;

const T0: i64 = 1_700_000_000_000;

/// Fix `meters_east` along the equator at `T0 + seconds`.
fn fix(meters_east: f64, altitude: f64, seconds: i64) -> LocationFix {
    LocationFix {
        latitude: 0.0,
        longitude: equator_degrees_for(meters_east),
        altitude,
        speed: None,
        timestamp_ms: T0 + seconds * 1000,
    }
}

fn session(memory: &MemoryStore, clock: &ManualClock) -> (RideSession, RideRepository) {
    let repository = RideRepository::new();
    let session = RideSession::restore(
        SessionConfig::default(),
        RideStateStore::new(memory.clone()),
        repository.clone(),
        Arc::new(clock.clone()),
    );
    (session, repository)
}

/// Ride east at 1 m/s, climbing 2 m per fix, one fix per second.
fn ride(session: &mut RideSession, clock: &ManualClock, fixes: i64) {
    for n in 0..fixes {
        clock.set(T0 + n * 1000);
        session.on_location_fix(fix(n as f64, 100.0 + 2.0 * n as f64, n));
    }
}

#[test]
fn test_five_fixes_then_pause() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(T0);
    let (mut session, repository) = session(&memory, &clock);

    session.start();
    ride(&mut session, &clock, 5);
    session.pause();

    let totals = *session.totals();
    // Four 1 m steps
    assert!((totals.distance_m - 4.0).abs() < 1e-6, "{}", totals.distance_m);
    // Four altitude readings never complete a batch of five
    assert_eq!(totals.elevation_gain_m, 0.0);
    assert_eq!(totals.elevation_loss_m, 0.0);
    assert_eq!(totals.elapsed_offset_ms, 4_000);
    assert_eq!(session.state(), RecordingState::Paused);

    let snapshot = repository.snapshot();
    assert!((snapshot.distance_m - 4.0).abs() < 1e-6);
    assert_eq!(snapshot.elapsed_ms, 4_000);
    assert_eq!(snapshot.recording_state, RecordingState::Paused);
    assert!((snapshot.speed_mps - 1.0).abs() < 1e-6);
    assert_eq!(snapshot.altitude_m, 108.0);
    assert_eq!(snapshot.gps_status, "Fixed");
}

#[test]
fn test_eleven_fixes_complete_two_elevation_batches() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(T0);
    let (mut session, _) = session(&memory, &clock);

    session.start();
    ride(&mut session, &clock, 11);
    session.pause();

    let totals = session.totals();
    assert!((totals.distance_m - 10.0).abs() < 1e-6);
    // Batches [102..110] avg 106 and [112..120] avg 116
    assert!((totals.elevation_gain_m - 10.0).abs() < 1e-9);
    assert_eq!(totals.elevation_loss_m, 0.0);
}

#[test]
fn test_restart_from_recording_checkpoint_comes_back_paused() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(T0);

    let recorded = {
        let (mut session, _) = session(&memory, &clock);
        session.start();
        ride(&mut session, &clock, 5);
        assert!(session.is_recording());
        *session.totals()
        // Process dies here without pausing.
    };

    clock.advance(120_000);
    let (mut restored, repository) = session(&memory, &clock);

    assert_eq!(restored.state(), RecordingState::Paused);
    let totals = *restored.totals();
    assert_eq!(totals.distance_m, recorded.distance_m as f32 as f64);
    assert_eq!(totals.elevation_gain_m, recorded.elevation_gain_m as f32 as f64);
    assert_eq!(totals.elevation_loss_m, recorded.elevation_loss_m as f32 as f64);
    assert_eq!(totals.elapsed_offset_ms, 4_000);
    assert_eq!(restored.elapsed_ms(), 4_000);

    let snapshot = repository.snapshot();
    assert!(snapshot.pending_recovery);
    assert_eq!(snapshot.recording_state, RecordingState::Paused);
    assert_eq!(snapshot.elapsed_ms, 4_000);

    restored.acknowledge_recovery();
    assert!(!*repository.pending_recovery().borrow());

    // Resuming continues from the checkpointed elapsed time.
    restored.start();
    clock.advance(1_000);
    assert_eq!(restored.elapsed_ms(), 5_000);
}

#[test]
fn test_checkpoint_at_start_is_pending() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(T0);
    let (mut session, _) = session(&memory, &clock);

    session.start();

    let store = RideStateStore::new(memory.clone());
    let pending = store.load_pending().unwrap().unwrap();
    assert_eq!(pending.distance_m, 0.0);
    assert_eq!(pending.elapsed_offset_ms, 0);
}

#[test]
fn test_reset_clears_totals_and_checkpoint() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(T0);
    let (mut session, repository) = session(&memory, &clock);

    session.start();
    ride(&mut session, &clock, 5);
    session.reset();

    assert_eq!(session.state(), RecordingState::Idle);
    assert_eq!(session.totals().distance_m, 0.0);
    assert_eq!(session.elapsed_ms(), 0);
    assert_eq!(RideStateStore::new(memory.clone()).load_pending().unwrap(), None);

    let snapshot = repository.snapshot();
    assert_eq!(snapshot.distance_m, 0.0);
    assert_eq!(snapshot.elapsed_ms, 0);
    assert!(!snapshot.pending_recovery);

    // A fresh process finds nothing to recover.
    let (restored, _) = self::session(&memory, &clock);
    assert_eq!(restored.state(), RecordingState::Idle);
}

#[test]
fn test_reset_leaves_sensor_state_alone() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(T0);
    let store = RideStateStore::new(memory.clone());
    let repository = RideRepository::new();

    let mut coordinator =
        ScanCoordinator::new(MockTransport::new(), store.clone(), repository.clone(), 80);
    let mut session = RideSession::restore(
        SessionConfig::default(),
        store,
        repository.clone(),
        Arc::new(clock.clone()),
    );

    coordinator.connect("AA:BB:CC:DD:EE:FF", SensorKind::HeartRate);
    let link = coordinator.transport().last_link();
    for event in handshake(link, SensorKind::HeartRate) {
        coordinator.handle_transport_event(event);
    }
    coordinator.handle_transport_event(notification(link, SensorKind::HeartRate, &[0x00, 120]));

    session.start();
    ride(&mut session, &clock, 3);
    session.reset();

    let snapshot = repository.snapshot();
    assert_eq!(snapshot.heart_rate_status, SensorConnectionState::Active);
    assert_eq!(snapshot.heart_rate_bpm, Some(120));
    assert_eq!(
        snapshot.heart_rate_target.as_deref(),
        Some("AA:BB:CC:DD:EE:FF")
    );
    assert_eq!(snapshot.distance_m, 0.0);
}

#[test]
fn test_pause_resume_does_not_double_count_distance() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(T0);
    let (mut session, _) = session(&memory, &clock);

    session.start();
    session.on_location_fix(fix(0.0, 100.0, 0));
    session.on_location_fix(fix(10.0, 100.0, 1));
    session.pause();

    // Moves while paused are not counted
    session.on_location_fix(fix(50.0, 100.0, 2));
    session.start();
    session.on_location_fix(fix(55.0, 100.0, 3));
    session.pause();

    assert!((session.totals().distance_m - 15.0).abs() < 1e-6);
}

#[test]
fn test_explicit_speed_wins_over_derived() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(T0);
    let (mut session, repository) = session(&memory, &clock);

    session.on_location_fix(fix(0.0, 100.0, 0));
    session.on_location_fix(LocationFix {
        speed: Some(7.5),
        ..fix(3.0, 100.0, 1)
    });
    assert_eq!(*repository.speed_mps().borrow(), 7.5);

    session.on_location_fix(fix(9.0, 100.0, 3));
    assert!((*repository.speed_mps().borrow() - 3.0).abs() < 1e-6);
}

#[test]
fn test_gps_status_follows_availability() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(T0);
    let (mut session, repository) = session(&memory, &clock);

    assert_eq!(*repository.gps_status().borrow(), "Acquiring...");
    session.on_location_fix(fix(0.0, 100.0, 0));
    assert_eq!(*repository.gps_status().borrow(), "Fixed");
    session.on_location_availability(false);
    assert_eq!(*repository.gps_status().borrow(), "Searching...");
}

/// Incline keeps its window across a pause while elevation starts a new
/// batch. The two filters disagree on purpose until the product decides
/// which behaviour both should share.
#[test]
fn test_pause_resets_elevation_but_not_incline() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(T0);
    let (mut session, repository) = session(&memory, &clock);

    session.start();
    // 10 fixes, 20 m apart, climbing 1 m each: incline 5%
    for n in 0..10 {
        session.on_location_fix(fix(n as f64 * 20.0, 100.0 + n as f64, n));
    }
    let climbing = *repository.incline_percent().borrow();
    assert!((climbing - 5.0).abs() < 1e-6, "{}", climbing);
    let gain_before_pause = session.totals().elevation_gain_m;

    session.pause();
    session.start();

    // The very next fix still reports a full-window incline.
    session.on_location_fix(fix(200.0, 110.0, 10));
    assert!((*repository.incline_percent().borrow() - 5.0).abs() < 1e-6);

    // Without the reset, [106..109] + 110 would have closed a batch at 108
    // against the previous 103. After it, the first new batch reports nothing.
    for n in 11..15 {
        session.on_location_fix(fix(n as f64 * 20.0, 100.0 + n as f64, n));
    }
    assert_eq!(session.totals().elevation_gain_m, gain_before_pause);
}
