//! Ride checkpoints and sensor targets on a SQLite file.

use ridelink::recording::types::RideTotals;
use ridelink::sensors::types::SensorKind;
use ridelink::storage::ride_state::RideStateStore;
use tempfile::TempDir;

fn totals() -> RideTotals {
    RideTotals {
        distance_m: 18_234.567_89,
        elevation_gain_m: 312.25,
        elevation_loss_m: 298.1,
        elapsed_offset_ms: 4_512_345,
    }
}

#[test]
fn test_checkpoint_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ride_state.db");

    {
        let store = RideStateStore::open(&path).unwrap();
        store.save_pending(&totals()).unwrap();
    }

    let store = RideStateStore::open(&path).unwrap();
    let loaded = store.load_pending().unwrap().expect("pending ride");
    let expected = totals();

    // Distances are kept at single precision
    assert_eq!(loaded.distance_m, expected.distance_m as f32 as f64);
    assert_eq!(loaded.elevation_gain_m, 312.25);
    assert_eq!(loaded.elevation_loss_m, expected.elevation_loss_m as f32 as f64);
    assert_eq!(loaded.elapsed_offset_ms, 4_512_345);
}

#[test]
fn test_cleared_checkpoint_stays_cleared() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ride_state.db");

    {
        let store = RideStateStore::open(&path).unwrap();
        store.save_pending(&totals()).unwrap();
        store.clear_pending().unwrap();
    }

    let store = RideStateStore::open(&path).unwrap();
    assert_eq!(store.load_pending().unwrap(), None);
}

#[test]
fn test_targets_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ride_state.db");

    {
        let store = RideStateStore::open(&path).unwrap();
        store
            .save_target(SensorKind::HeartRate, "C8:FD:19:00:11:22")
            .unwrap();
        store.save_target(SensorKind::Radar, "D4:22:CD:00:33:44").unwrap();
        store.clear_target(SensorKind::Radar).unwrap();
    }

    let store = RideStateStore::open(&path).unwrap();
    assert_eq!(
        store.load_target(SensorKind::HeartRate).as_deref(),
        Some("C8:FD:19:00:11:22")
    );
    assert_eq!(store.load_target(SensorKind::Radar), None);
}

#[test]
fn test_checkpoint_overwrites_previous() {
    let dir = TempDir::new().unwrap();
    let store = RideStateStore::open(&dir.path().join("ride_state.db")).unwrap();

    store.save_pending(&totals()).unwrap();
    let later = RideTotals {
        distance_m: 20_000.0,
        ..totals()
    };
    store.save_pending(&later).unwrap();

    assert_eq!(store.load_pending().unwrap().unwrap().distance_m, 20_000.0);
}
