//! Ride session state machine.
//!
//! `RideSession` owns the recording state and the ride totals. It is the only
//! writer of ride checkpoints. Every checkpoint stores the elapsed time as it
//! would read if the ride were paused at that instant, so a restored ride
//! always comes back paused.

use crate::metrics::geo::haversine_distance;
use crate::metrics::smoothing::{
    ElevationFilter, InclineConfig, InclineFilter, DEFAULT_ELEVATION_BATCH_SIZE,
};
use crate::recording::clock::Clock;
use crate::recording::types::{LocationFix, RecordingState, RideTotals};
use crate::state::repository::{RideRepository, GPS_FIXED, GPS_SEARCHING};
use crate::storage::kv::StoreError;
use crate::storage::ride_state::RideStateStore;
use std::sync::Arc;

/// Tunables for a ride session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub incline: InclineConfig,
    pub elevation_batch_size: usize,
    /// Consecutive failed checkpoint writes before a persistence status is published
    pub failure_status_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            incline: InclineConfig::default(),
            elevation_batch_size: DEFAULT_ELEVATION_BATCH_SIZE,
            failure_status_threshold: 3,
        }
    }
}

/// The authoritative ride state.
pub struct RideSession {
    state: RecordingState,
    totals: RideTotals,
    /// Start of the current recording segment
    segment_start_ms: Option<i64>,
    last_fix: Option<LocationFix>,
    incline: InclineFilter,
    elevation: ElevationFilter,
    store: RideStateStore,
    repository: RideRepository,
    clock: Arc<dyn Clock>,
    failed_writes: u32,
    failure_status_threshold: u32,
}

impl RideSession {
    /// Create a session, restoring a pending checkpoint if one exists.
    ///
    /// A restored ride is always `Paused` and raises the pending-recovery flag.
    pub fn restore(
        config: SessionConfig,
        store: RideStateStore,
        repository: RideRepository,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut session = Self {
            state: RecordingState::Idle,
            totals: RideTotals::default(),
            segment_start_ms: None,
            last_fix: None,
            incline: InclineFilter::new(config.incline),
            elevation: ElevationFilter::new(config.elevation_batch_size),
            store,
            repository,
            clock,
            failed_writes: 0,
            failure_status_threshold: config.failure_status_threshold.max(1),
        };

        match session.store.load_pending() {
            Ok(Some(totals)) => {
                tracing::info!(
                    "Recovered pending ride: {:.1} m, {} ms elapsed",
                    totals.distance_m,
                    totals.elapsed_offset_ms
                );
                session.totals = totals;
                session.state = RecordingState::Paused;
                session.repository.set_pending_recovery(true);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to read ride checkpoint: {}", e),
        }

        session.publish();
        session
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state.is_recording()
    }

    pub fn totals(&self) -> &RideTotals {
        &self.totals
    }

    pub fn last_fix(&self) -> Option<&LocationFix> {
        self.last_fix.as_ref()
    }

    /// Elapsed ride time in milliseconds.
    pub fn elapsed_ms(&self) -> i64 {
        match (self.state, self.segment_start_ms) {
            (RecordingState::Recording, Some(start)) => {
                self.totals.elapsed_offset_ms + (self.clock.now_ms() - start).max(0)
            }
            _ => self.totals.elapsed_offset_ms,
        }
    }

    /// Begin or resume recording.
    pub fn start(&mut self) {
        if self.is_recording() {
            return;
        }

        self.state = RecordingState::Recording;
        self.segment_start_ms = Some(self.clock.now_ms());
        tracing::info!("Ride recording started");

        self.checkpoint();
        self.repository.set_recording_state(self.state);
        self.repository.set_elapsed(self.elapsed_ms());
    }

    /// Pause recording, folding the segment into the elapsed offset.
    pub fn pause(&mut self) {
        if !self.is_recording() {
            return;
        }

        self.totals.elapsed_offset_ms = self.elapsed_ms();
        self.segment_start_ms = None;
        self.state = RecordingState::Paused;
        tracing::info!("Ride paused at {} ms", self.totals.elapsed_offset_ms);

        self.checkpoint();
        // Incline keeps its window across the pause; elevation starts a fresh batch.
        self.elevation.reset();

        self.repository.set_recording_state(self.state);
        self.repository.set_elapsed(self.elapsed_ms());
    }

    /// Discard the ride. Sensor state is left alone.
    pub fn reset(&mut self) {
        self.state = RecordingState::Idle;
        self.totals = RideTotals::default();
        self.segment_start_ms = None;
        self.incline.reset();
        self.elevation.reset();
        tracing::info!("Ride reset");

        let cleared = self.store.clear_pending();
        self.record_write(cleared);

        self.repository.set_pending_recovery(false);
        self.repository.set_speed(0.0);
        self.repository.set_incline(0.0);
        self.publish();
    }

    /// Dismiss the recovery notice.
    pub fn acknowledge_recovery(&mut self) {
        self.repository.set_pending_recovery(false);
    }

    /// Apply one GPS fix.
    pub fn on_location_fix(&mut self, fix: LocationFix) {
        self.repository.set_gps_status(GPS_FIXED);

        let step_m = self.last_fix.as_ref().map(|prev| {
            haversine_distance(prev.latitude, prev.longitude, fix.latitude, fix.longitude)
        });

        let speed = fix.speed.unwrap_or_else(|| match (&self.last_fix, step_m) {
            (Some(prev), Some(step)) if fix.timestamp_ms > prev.timestamp_ms => {
                step / ((fix.timestamp_ms - prev.timestamp_ms) as f64 / 1000.0)
            }
            _ => 0.0,
        });
        self.repository.set_speed(speed);
        self.repository.set_altitude(fix.altitude);

        let incline = self.incline.push(&fix);
        self.repository.set_incline(incline);

        if let (true, Some(step)) = (self.is_recording(), step_m) {
            self.totals.distance_m += step;

            let delta = self.elevation.update(fix.altitude);
            self.totals.elevation_gain_m += delta.gain;
            self.totals.elevation_loss_m += delta.loss;

            self.checkpoint();
            self.repository.set_totals(&self.totals);
        }

        self.last_fix = Some(fix);
    }

    /// The location provider gained or lost its signal.
    pub fn on_location_availability(&mut self, available: bool) {
        if !available {
            tracing::warn!("GPS signal lost");
            self.repository.set_gps_status(GPS_SEARCHING);
        }
    }

    /// Publish the current elapsed time.
    pub fn tick(&self) -> i64 {
        let elapsed = self.elapsed_ms();
        self.repository.set_elapsed(elapsed);
        elapsed
    }

    fn checkpoint(&mut self) {
        let snapshot = RideTotals {
            elapsed_offset_ms: self.elapsed_ms(),
            ..self.totals
        };
        let saved = self.store.save_pending(&snapshot);
        self.record_write(saved);
    }

    fn record_write(&mut self, result: Result<(), StoreError>) {
        match result {
            Ok(()) => {
                if self.failed_writes >= self.failure_status_threshold {
                    tracing::info!("Ride state persistence recovered");
                    self.repository.set_persistence_status(None);
                }
                self.failed_writes = 0;
            }
            Err(e) => {
                self.failed_writes += 1;
                tracing::warn!(
                    "Ride state write failed ({} in a row): {}",
                    self.failed_writes,
                    e
                );
                if self.failed_writes >= self.failure_status_threshold {
                    self.repository
                        .set_persistence_status(Some(format!("Ride progress not saved: {}", e)));
                }
            }
        }
    }

    fn publish(&self) {
        self.repository.set_recording_state(self.state);
        self.repository.set_totals(&self.totals);
        self.repository.set_elapsed(self.elapsed_ms());
    }
}
