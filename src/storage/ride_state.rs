//! Checkpoint and sensor-target persistence.
//!
//! Persisted keys:
//!
//! | key | value |
//! |---|---|
//! | `ride_pending` | `true` / `false` |
//! | `ride_distance` | meters, 32-bit float |
//! | `ride_elevation_gain` | meters, 32-bit float |
//! | `ride_elevation_loss` | meters, 32-bit float |
//! | `ride_elapsed_offset` | milliseconds, i64 |
//! | `sensor_hr_address` | remembered heart rate monitor |
//! | `sensor_radar_address` | remembered radar |
//!
//! Distances are rounded through `f32` before they are written, so a restored
//! total carries about 7 significant digits. That keeps sub-meter accuracy up
//! to roughly 16,000 km.

use crate::recording::types::RideTotals;
use crate::sensors::types::SensorKind;
use crate::storage::kv::{KeyValueStore, KvOp, SqliteStore, StoreError};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const KEY_RIDE_PENDING: &str = "ride_pending";
pub const KEY_RIDE_DISTANCE: &str = "ride_distance";
pub const KEY_RIDE_ELEVATION_GAIN: &str = "ride_elevation_gain";
pub const KEY_RIDE_ELEVATION_LOSS: &str = "ride_elevation_loss";
pub const KEY_RIDE_ELAPSED_OFFSET: &str = "ride_elapsed_offset";
pub const KEY_SENSOR_HR_ADDRESS: &str = "sensor_hr_address";
pub const KEY_SENSOR_RADAR_ADDRESS: &str = "sensor_radar_address";

/// Default number of attempts per write.
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;

/// Store key holding the remembered target for a sensor kind.
pub fn target_key(kind: SensorKind) -> &'static str {
    match kind {
        SensorKind::HeartRate => KEY_SENSOR_HR_ADDRESS,
        SensorKind::Radar => KEY_SENSOR_RADAR_ADDRESS,
    }
}

/// Ride checkpoint and sensor target persistence. Clones share the backend.
#[derive(Clone)]
pub struct RideStateStore {
    backend: Arc<Mutex<Box<dyn KeyValueStore>>>,
    write_attempts: u32,
}

impl RideStateStore {
    /// Wrap a key/value backend.
    pub fn new(backend: impl KeyValueStore + 'static) -> Self {
        Self {
            backend: Arc::new(Mutex::new(Box::new(backend))),
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
        }
    }

    /// Open the SQLite-backed store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(SqliteStore::open(path)?))
    }

    /// Number of attempts per write (at least 1).
    pub fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = attempts.max(1);
        self
    }

    /// Overwrite the checkpoint and mark it pending.
    pub fn save_pending(&self, totals: &RideTotals) -> Result<(), StoreError> {
        self.write(&[
            KvOp::put(KEY_RIDE_DISTANCE, format_meters(totals.distance_m)),
            KvOp::put(KEY_RIDE_ELEVATION_GAIN, format_meters(totals.elevation_gain_m)),
            KvOp::put(KEY_RIDE_ELEVATION_LOSS, format_meters(totals.elevation_loss_m)),
            KvOp::put(KEY_RIDE_ELAPSED_OFFSET, totals.elapsed_offset_ms.to_string()),
            KvOp::put(KEY_RIDE_PENDING, "true"),
        ])
    }

    /// The checkpointed totals, if a ride is pending.
    pub fn load_pending(&self) -> Result<Option<RideTotals>, StoreError> {
        if self.read(KEY_RIDE_PENDING)?.as_deref() != Some("true") {
            return Ok(None);
        }

        Ok(Some(RideTotals {
            distance_m: self.read_meters(KEY_RIDE_DISTANCE)?,
            elevation_gain_m: self.read_meters(KEY_RIDE_ELEVATION_GAIN)?,
            elevation_loss_m: self.read_meters(KEY_RIDE_ELEVATION_LOSS)?,
            elapsed_offset_ms: self.read_parsed::<i64>(KEY_RIDE_ELAPSED_OFFSET)?.unwrap_or(0),
        }))
    }

    /// Unset the pending flag and remove the checkpointed values.
    pub fn clear_pending(&self) -> Result<(), StoreError> {
        self.write(&[
            KvOp::put(KEY_RIDE_PENDING, "false"),
            KvOp::remove(KEY_RIDE_DISTANCE),
            KvOp::remove(KEY_RIDE_ELEVATION_GAIN),
            KvOp::remove(KEY_RIDE_ELEVATION_LOSS),
            KvOp::remove(KEY_RIDE_ELAPSED_OFFSET),
        ])
    }

    /// Remember the target address for a sensor kind.
    pub fn save_target(&self, kind: SensorKind, address: &str) -> Result<(), StoreError> {
        self.write(&[KvOp::put(target_key(kind), address)])
    }

    /// Forget the target address for a sensor kind.
    pub fn clear_target(&self, kind: SensorKind) -> Result<(), StoreError> {
        self.write(&[KvOp::remove(target_key(kind))])
    }

    /// Remembered target address. Read failures are logged and treated as absent.
    pub fn load_target(&self, kind: SensorKind) -> Option<String> {
        match self.read(target_key(kind)) {
            Ok(address) => address.filter(|a| !a.is_empty()),
            Err(e) => {
                tracing::warn!("Failed to load {} target: {}", kind, e);
                None
            }
        }
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let backend = self.backend.lock().map_err(|_| StoreError::Poisoned)?;
        backend.get(key)
    }

    fn read_parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.read(key)? else {
            return Ok(None);
        };
        match raw.parse::<T>() {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                tracing::warn!("Ignoring unparseable value for {}: {:?}", key, raw);
                Ok(None)
            }
        }
    }

    fn read_meters(&self, key: &str) -> Result<f64, StoreError> {
        Ok(self.read_parsed::<f32>(key)?.map(f64::from).unwrap_or(0.0))
    }

    /// Apply a batch, retrying a bounded number of times.
    fn write(&self, ops: &[KvOp]) -> Result<(), StoreError> {
        let mut backend = self.backend.lock().map_err(|_| StoreError::Poisoned)?;

        let mut attempt = 1;
        loop {
            match backend.apply(ops) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.write_attempts => {
                    tracing::debug!("Store write attempt {} failed: {}", attempt, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn format_meters(meters: f64) -> String {
    (meters as f32).to_string()
}
