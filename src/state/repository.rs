//! Aggregate live ride state.
//!
//! `RideRepository` is created once and handed to every component that
//! publishes. Each value sits in its own `watch` channel, so readers get the
//! current value immediately and can await changes. Only crate components
//! mutate it.

use crate::recording::types::{RecordingState, RideTotals};
use crate::sensors::types::{ScannedPeripheral, SensorConnectionState, SensorEvent, SensorKind};
use crossbeam::channel::{Receiver, Sender};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// GPS status before the first fix arrives.
pub const GPS_ACQUIRING: &str = "Acquiring...";
/// GPS status once fixes are flowing.
pub const GPS_FIXED: &str = "Fixed";
/// GPS status after the provider reported the signal lost.
pub const GPS_SEARCHING: &str = "Searching...";

/// Adapter status while no scan is running.
pub const ADAPTER_IDLE: &str = "Idle";
/// Adapter status while the discovery scan runs.
pub const ADAPTER_SCANNING: &str = "Scanning...";

/// Point-in-time copy of every published value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RideSnapshot {
    pub speed_mps: f64,
    pub altitude_m: f64,
    pub incline_percent: f64,
    pub distance_m: f64,
    pub elevation_gain_m: f64,
    pub elevation_loss_m: f64,
    pub elapsed_ms: i64,
    pub recording_state: RecordingState,
    pub heart_rate_bpm: Option<u16>,
    /// Closest vehicle in meters, `None` when the road is clear
    pub radar_distance_m: Option<u8>,
    pub heart_rate_status: SensorConnectionState,
    pub radar_status: SensorConnectionState,
    pub heart_rate_target: Option<String>,
    pub radar_target: Option<String>,
    pub peripherals: Vec<ScannedPeripheral>,
    pub pending_recovery: bool,
    pub adapter_status: String,
    pub gps_status: String,
    pub persistence_status: Option<String>,
}

/// One watch channel per sensor kind.
struct PerSensor<T> {
    heart_rate: watch::Sender<T>,
    radar: watch::Sender<T>,
}

impl<T: Clone> PerSensor<T> {
    fn new(initial: T) -> Self {
        Self {
            heart_rate: watch::Sender::new(initial.clone()),
            radar: watch::Sender::new(initial),
        }
    }

    fn get(&self, kind: SensorKind) -> &watch::Sender<T> {
        match kind {
            SensorKind::HeartRate => &self.heart_rate,
            SensorKind::Radar => &self.radar,
        }
    }
}

struct Channels {
    speed_mps: watch::Sender<f64>,
    altitude_m: watch::Sender<f64>,
    incline_percent: watch::Sender<f64>,
    distance_m: watch::Sender<f64>,
    elevation_gain_m: watch::Sender<f64>,
    elevation_loss_m: watch::Sender<f64>,
    elapsed_ms: watch::Sender<i64>,
    recording_state: watch::Sender<RecordingState>,
    heart_rate_bpm: watch::Sender<Option<u16>>,
    radar_distance_m: watch::Sender<Option<u8>>,
    sensor_status: PerSensor<SensorConnectionState>,
    targets: PerSensor<Option<String>>,
    peripherals: watch::Sender<Vec<ScannedPeripheral>>,
    pending_recovery: watch::Sender<bool>,
    adapter_status: watch::Sender<String>,
    gps_status: watch::Sender<String>,
    persistence_status: watch::Sender<Option<String>>,
    event_tx: Sender<SensorEvent>,
    event_rx: Receiver<SensorEvent>,
}

/// Shared, observable ride state. Clones refer to the same state.
#[derive(Clone)]
pub struct RideRepository {
    channels: Arc<Channels>,
}

impl std::fmt::Debug for RideRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RideRepository")
            .field("recording_state", &*self.channels.recording_state.borrow())
            .field("adapter_status", &*self.channels.adapter_status.borrow())
            .finish_non_exhaustive()
    }
}

impl Default for RideRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl RideRepository {
    pub fn new() -> Self {
        let (event_tx, event_rx) = crossbeam::channel::unbounded();

        Self {
            channels: Arc::new(Channels {
                speed_mps: watch::Sender::new(0.0),
                altitude_m: watch::Sender::new(0.0),
                incline_percent: watch::Sender::new(0.0),
                distance_m: watch::Sender::new(0.0),
                elevation_gain_m: watch::Sender::new(0.0),
                elevation_loss_m: watch::Sender::new(0.0),
                elapsed_ms: watch::Sender::new(0),
                recording_state: watch::Sender::new(RecordingState::Idle),
                heart_rate_bpm: watch::Sender::new(None),
                radar_distance_m: watch::Sender::new(None),
                sensor_status: PerSensor::new(SensorConnectionState::Disconnected),
                targets: PerSensor::new(None),
                peripherals: watch::Sender::new(Vec::new()),
                pending_recovery: watch::Sender::new(false),
                adapter_status: watch::Sender::new(ADAPTER_IDLE.to_string()),
                gps_status: watch::Sender::new(GPS_ACQUIRING.to_string()),
                persistence_status: watch::Sender::new(None),
                event_tx,
                event_rx,
            }),
        }
    }

    // ---- Observers ----

    pub fn speed_mps(&self) -> watch::Receiver<f64> {
        self.channels.speed_mps.subscribe()
    }

    pub fn altitude_m(&self) -> watch::Receiver<f64> {
        self.channels.altitude_m.subscribe()
    }

    pub fn incline_percent(&self) -> watch::Receiver<f64> {
        self.channels.incline_percent.subscribe()
    }

    pub fn distance_m(&self) -> watch::Receiver<f64> {
        self.channels.distance_m.subscribe()
    }

    pub fn elevation_gain_m(&self) -> watch::Receiver<f64> {
        self.channels.elevation_gain_m.subscribe()
    }

    pub fn elevation_loss_m(&self) -> watch::Receiver<f64> {
        self.channels.elevation_loss_m.subscribe()
    }

    pub fn elapsed_ms(&self) -> watch::Receiver<i64> {
        self.channels.elapsed_ms.subscribe()
    }

    pub fn recording_state(&self) -> watch::Receiver<RecordingState> {
        self.channels.recording_state.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        self.channels.recording_state.borrow().is_recording()
    }

    pub fn heart_rate_bpm(&self) -> watch::Receiver<Option<u16>> {
        self.channels.heart_rate_bpm.subscribe()
    }

    pub fn radar_distance_m(&self) -> watch::Receiver<Option<u8>> {
        self.channels.radar_distance_m.subscribe()
    }

    pub fn sensor_status(&self, kind: SensorKind) -> watch::Receiver<SensorConnectionState> {
        self.channels.sensor_status.get(kind).subscribe()
    }

    pub fn target_address(&self, kind: SensorKind) -> watch::Receiver<Option<String>> {
        self.channels.targets.get(kind).subscribe()
    }

    /// Current remembered target for a kind.
    pub fn target(&self, kind: SensorKind) -> Option<String> {
        self.channels.targets.get(kind).borrow().clone()
    }

    pub fn peripherals(&self) -> watch::Receiver<Vec<ScannedPeripheral>> {
        self.channels.peripherals.subscribe()
    }

    pub fn pending_recovery(&self) -> watch::Receiver<bool> {
        self.channels.pending_recovery.subscribe()
    }

    pub fn adapter_status(&self) -> watch::Receiver<String> {
        self.channels.adapter_status.subscribe()
    }

    pub fn gps_status(&self) -> watch::Receiver<String> {
        self.channels.gps_status.subscribe()
    }

    pub fn persistence_status(&self) -> watch::Receiver<Option<String>> {
        self.channels.persistence_status.subscribe()
    }

    /// Receiver for one-shot sensor events such as radar alerts.
    pub fn alert_receiver(&self) -> Receiver<SensorEvent> {
        self.channels.event_rx.clone()
    }

    /// Copy every current value.
    pub fn snapshot(&self) -> RideSnapshot {
        let c = &self.channels;
        RideSnapshot {
            speed_mps: *c.speed_mps.borrow(),
            altitude_m: *c.altitude_m.borrow(),
            incline_percent: *c.incline_percent.borrow(),
            distance_m: *c.distance_m.borrow(),
            elevation_gain_m: *c.elevation_gain_m.borrow(),
            elevation_loss_m: *c.elevation_loss_m.borrow(),
            elapsed_ms: *c.elapsed_ms.borrow(),
            recording_state: *c.recording_state.borrow(),
            heart_rate_bpm: *c.heart_rate_bpm.borrow(),
            radar_distance_m: *c.radar_distance_m.borrow(),
            heart_rate_status: *c.sensor_status.heart_rate.borrow(),
            radar_status: *c.sensor_status.radar.borrow(),
            heart_rate_target: c.targets.heart_rate.borrow().clone(),
            radar_target: c.targets.radar.borrow().clone(),
            peripherals: c.peripherals.borrow().clone(),
            pending_recovery: *c.pending_recovery.borrow(),
            adapter_status: c.adapter_status.borrow().clone(),
            gps_status: c.gps_status.borrow().clone(),
            persistence_status: c.persistence_status.borrow().clone(),
        }
    }

    // ---- Publishers ----

    pub(crate) fn set_speed(&self, speed_mps: f64) {
        self.channels.speed_mps.send_replace(speed_mps);
    }

    pub(crate) fn set_altitude(&self, altitude_m: f64) {
        self.channels.altitude_m.send_replace(altitude_m);
    }

    pub(crate) fn set_incline(&self, incline_percent: f64) {
        self.channels.incline_percent.send_replace(incline_percent);
    }

    /// Publish distance and elevation totals together.
    pub(crate) fn set_totals(&self, totals: &RideTotals) {
        self.channels.distance_m.send_replace(totals.distance_m);
        self.channels
            .elevation_gain_m
            .send_replace(totals.elevation_gain_m);
        self.channels
            .elevation_loss_m
            .send_replace(totals.elevation_loss_m);
    }

    pub(crate) fn set_elapsed(&self, elapsed_ms: i64) {
        self.channels.elapsed_ms.send_replace(elapsed_ms);
    }

    pub(crate) fn set_recording_state(&self, state: RecordingState) {
        self.channels.recording_state.send_replace(state);
    }

    pub(crate) fn set_heart_rate(&self, bpm: Option<u16>) {
        self.channels.heart_rate_bpm.send_replace(bpm);
    }

    pub(crate) fn set_radar_distance(&self, distance_m: Option<u8>) {
        self.channels.radar_distance_m.send_replace(distance_m);
    }

    pub(crate) fn set_sensor_status(&self, kind: SensorKind, state: SensorConnectionState) {
        self.channels.sensor_status.get(kind).send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    pub(crate) fn set_target(&self, kind: SensorKind, address: Option<String>) {
        self.channels.targets.get(kind).send_replace(address);
    }

    /// Insert a peripheral or replace the entry with the same address.
    pub(crate) fn upsert_peripheral(&self, peripheral: ScannedPeripheral) {
        self.channels.peripherals.send_modify(|list| {
            match list.iter_mut().find(|p| p.address == peripheral.address) {
                Some(existing) => *existing = peripheral,
                None => list.push(peripheral),
            }
        });
    }

    pub(crate) fn clear_peripherals(&self) {
        self.channels.peripherals.send_replace(Vec::new());
    }

    pub(crate) fn set_pending_recovery(&self, pending: bool) {
        self.channels.pending_recovery.send_replace(pending);
    }

    pub(crate) fn set_adapter_status(&self, status: String) {
        self.channels.adapter_status.send_replace(status);
    }

    pub(crate) fn set_gps_status(&self, status: &str) {
        self.channels.gps_status.send_if_modified(|current| {
            if current == status {
                return false;
            }
            *current = status.to_string();
            true
        });
    }

    pub(crate) fn set_persistence_status(&self, status: Option<String>) {
        self.channels.persistence_status.send_replace(status);
    }

    pub(crate) fn publish_event(&self, event: SensorEvent) {
        if self.channels.event_tx.send(event).is_err() {
            tracing::debug!("No receiver for sensor event");
        }
    }
}
