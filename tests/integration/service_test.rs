//! Event sequencer and elapsed-time ticker.

use crate::mock_transport::{discovered, handshake, notification, Call, MockTransport};
use ridelink::app::{AppCommand, AppEvent, RideService, TEARDOWN_TIMEOUT};
use ridelink::metrics::geo::equator_degrees_for;
use ridelink::recording::clock::ManualClock;
use ridelink::recording::types::{LocationFix, RecordingState};
use ridelink::sensors::types::{LinkId, SensorConnectionState, SensorKind};
use ridelink::state::RideRepository;
use ridelink::storage::config::AppConfig;
use ridelink::storage::kv::MemoryStore;
use ridelink::storage::ride_state::RideStateStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn service(
    memory: &MemoryStore,
    clock: &ManualClock,
) -> (RideService<MockTransport>, RideRepository) {
    service_with(memory, clock, MockTransport::new())
}

fn service_with(
    memory: &MemoryStore,
    clock: &ManualClock,
    transport: MockTransport,
) -> (RideService<MockTransport>, RideRepository) {
    let repository = RideRepository::new();
    let service = RideService::from_config(
        &AppConfig::default(),
        transport,
        RideStateStore::new(memory.clone()),
        repository.clone(),
        Arc::new(clock.clone()),
    );
    (service, repository)
}

async fn wait_for_state(repository: &RideRepository, wanted: RecordingState) {
    let mut state = repository.recording_state();
    state
        .wait_for(|s| *s == wanted)
        .await
        .expect("repository dropped");
}

#[tokio::test(start_paused = true)]
async fn test_ticker_runs_only_while_recording() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(0);
    let (service, repository) = service(&memory, &clock);

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut service = service;
        service.run(rx).await;
        service
    });

    let mut elapsed = repository.elapsed_ms();

    tx.send(AppCommand::StartRide.into()).unwrap();
    wait_for_state(&repository, RecordingState::Recording).await;

    clock.advance(3_000);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(*elapsed.borrow_and_update(), 3_000);

    tx.send(AppCommand::PauseRide.into()).unwrap();
    wait_for_state(&repository, RecordingState::Paused).await;
    assert_eq!(*elapsed.borrow_and_update(), 3_000);

    // No ticks while paused, so nothing is republished.
    clock.advance(10_000);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!elapsed.has_changed().unwrap());

    // Resuming picks up where the offset left off.
    tx.send(AppCommand::StartRide.into()).unwrap();
    wait_for_state(&repository, RecordingState::Recording).await;
    clock.advance(2_000);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(*elapsed.borrow_and_update(), 5_000);

    tx.send(AppCommand::Shutdown.into()).unwrap();
    let service = handle.await.unwrap();
    assert!(service.session().is_recording());
}

#[tokio::test]
async fn test_events_are_applied_in_order() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(0);
    let (mut service, repository) = service(&memory, &clock);

    let (tx, rx) = mpsc::unbounded_channel();
    let link = LinkId(1);

    let mut events: Vec<AppEvent> = vec![
        AppCommand::StartScan.into(),
        discovered("HR-1", Some("Polar H10"), -60, SensorKind::HeartRate).into(),
        AppCommand::Connect {
            address: "HR-1".to_string(),
            kind: SensorKind::HeartRate,
        }
        .into(),
    ];
    events.extend(handshake(link, SensorKind::HeartRate).into_iter().map(AppEvent::from));
    events.push(notification(link, SensorKind::HeartRate, &[0x00, 151]).into());
    events.push(AppCommand::StartRide.into());
    for n in 0..3 {
        events.push(AppEvent::Location(LocationFix {
            latitude: 0.0,
            longitude: equator_degrees_for(n as f64 * 5.0),
            altitude: 50.0,
            speed: None,
            timestamp_ms: n * 1000,
        }));
    }
    events.push(AppCommand::PauseRide.into());

    for event in events {
        tx.send(event).unwrap();
    }
    drop(tx);

    // Closing the channel ends the loop and releases the link.
    service.run(rx).await;

    let snapshot = repository.snapshot();
    assert_eq!(snapshot.heart_rate_bpm, None);
    assert_eq!(snapshot.heart_rate_status, SensorConnectionState::Disconnected);
    assert!((snapshot.distance_m - 10.0).abs() < 1e-6);
    assert_eq!(snapshot.recording_state, RecordingState::Paused);
    assert_eq!(snapshot.peripherals.len(), 1);

    let transport = service.coordinator().transport();
    assert!(transport.calls.contains(&Call::Close(link)));
    // Targets outlive the process.
    assert_eq!(
        RideStateStore::new(memory.clone())
            .load_target(SensorKind::HeartRate)
            .as_deref(),
        Some("HR-1")
    );
}

#[tokio::test]
async fn test_recovered_ride_waits_for_acknowledgement() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(0);
    RideStateStore::new(memory.clone())
        .save_pending(&ridelink::recording::types::RideTotals {
            distance_m: 2_500.0,
            elevation_gain_m: 40.0,
            elevation_loss_m: 35.0,
            elapsed_offset_ms: 600_000,
        })
        .unwrap();

    let (mut service, repository) = service(&memory, &clock);
    assert!(*repository.pending_recovery().borrow());
    assert_eq!(service.session().state(), RecordingState::Paused);

    assert!(service.handle_event(AppCommand::AcknowledgeRecovery.into()));
    assert!(!*repository.pending_recovery().borrow());
    assert_eq!(repository.snapshot().distance_m, 2_500.0);

    assert!(!service.handle_event(AppCommand::Shutdown.into()));
}

#[tokio::test]
async fn test_gps_loss_is_reported() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(0);
    let (mut service, repository) = service(&memory, &clock);

    service.handle_event(AppEvent::LocationAvailability(false));
    assert_eq!(*repository.gps_status().borrow(), "Searching...");
}

#[tokio::test]
async fn test_shutdown_waits_for_ble_teardown() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(0);
    let transport = MockTransport::new();
    let drained = transport.drained.clone();
    let (mut service, _repository) = service_with(&memory, &clock, transport);

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(
        AppCommand::Connect {
            address: "HR-1".to_string(),
            kind: SensorKind::HeartRate,
        }
        .into(),
    )
    .unwrap();
    tx.send(AppCommand::Shutdown.into()).unwrap();

    service.run(rx).await;

    assert!(drained.load(Ordering::SeqCst));
    let transport = service.coordinator().transport();
    assert!(transport.calls.contains(&Call::Disconnect(LinkId(1))));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_teardown_is_bounded() {
    let memory = MemoryStore::new();
    let clock = ManualClock::new(0);
    let mut transport = MockTransport::new();
    transport.stall_drain = true;
    let (mut service, _repository) = service_with(&memory, &clock, transport);

    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(AppCommand::Shutdown.into()).unwrap();

    let started = tokio::time::Instant::now();
    service.run(rx).await;

    assert!(started.elapsed() >= TEARDOWN_TIMEOUT);
    assert!(!service.coordinator().transport().drained.load(Ordering::SeqCst));
}
