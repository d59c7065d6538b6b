//! Incline and elevation smoothing over noisy GPS altitude.
//!
//! - `InclineFilter`: rise over run between the two halves of a sliding window
//! - `ElevationFilter`: gain/loss from successive batch averages

use crate::metrics::geo::haversine_distance;
use crate::recording::types::{ElevationDelta, LocationFix};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of fixes in the incline window.
pub const DEFAULT_INCLINE_WINDOW: usize = 10;

/// Minimum run in meters before an incline is reported.
pub const DEFAULT_MIN_INCLINE_DISTANCE_M: f64 = 10.0;

/// Default number of altitude readings per elevation batch.
pub const DEFAULT_ELEVATION_BATCH_SIZE: usize = 5;

/// How the incline window is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclineMode {
    /// Wait for a full window, compare the centroids of its two halves
    #[default]
    FullWindow,
    /// Report once two fixes are held, compare oldest against newest
    Endpoints,
}

/// Incline filter settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InclineConfig {
    /// Window capacity in fixes (at least 2)
    pub window: usize,
    pub mode: InclineMode,
    /// Runs at or below this distance report 0%
    pub min_distance_m: f64,
}

impl Default for InclineConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_INCLINE_WINDOW,
            mode: InclineMode::FullWindow,
            min_distance_m: DEFAULT_MIN_INCLINE_DISTANCE_M,
        }
    }
}

/// Sliding-window incline estimator.
#[derive(Debug)]
pub struct InclineFilter {
    config: InclineConfig,
    window: VecDeque<LocationFix>,
}

/// Mean position and altitude of a run of fixes.
struct Centroid {
    latitude: f64,
    longitude: f64,
    altitude: f64,
}

impl Centroid {
    fn of<'a>(fixes: impl Iterator<Item = &'a LocationFix>) -> Option<Self> {
        let mut count = 0usize;
        let (mut lat, mut lon, mut alt) = (0.0, 0.0, 0.0);

        for fix in fixes {
            lat += fix.latitude;
            lon += fix.longitude;
            alt += fix.altitude;
            count += 1;
        }

        if count == 0 {
            return None;
        }

        let n = count as f64;
        Some(Self {
            latitude: lat / n,
            longitude: lon / n,
            altitude: alt / n,
        })
    }
}

impl InclineFilter {
    /// Create a filter. Windows smaller than 2 are raised to 2.
    pub fn new(config: InclineConfig) -> Self {
        let config = InclineConfig {
            window: config.window.max(2),
            ..config
        };
        Self {
            config,
            window: VecDeque::with_capacity(config.window),
        }
    }

    pub fn config(&self) -> &InclineConfig {
        &self.config
    }

    /// Add a fix and return the current incline in percent.
    pub fn push(&mut self, fix: &LocationFix) -> f64 {
        self.window.push_back(*fix);
        if self.window.len() > self.config.window {
            self.window.pop_front();
        }

        let required = match self.config.mode {
            InclineMode::FullWindow => self.config.window,
            InclineMode::Endpoints => 2,
        };
        if self.window.len() < required {
            return 0.0;
        }

        let (first, second) = match self.config.mode {
            InclineMode::FullWindow => {
                let half = self.window.len() / 2;
                (
                    Centroid::of(self.window.iter().take(half)),
                    Centroid::of(self.window.iter().skip(half)),
                )
            }
            InclineMode::Endpoints => (
                Centroid::of(self.window.front().into_iter()),
                Centroid::of(self.window.back().into_iter()),
            ),
        };

        let (Some(first), Some(second)) = (first, second) else {
            return 0.0;
        };

        let run = haversine_distance(
            first.latitude,
            first.longitude,
            second.latitude,
            second.longitude,
        );

        if run > self.config.min_distance_m {
            (second.altitude - first.altitude) / run * 100.0
        } else {
            0.0
        }
    }

    /// Number of fixes currently held.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Forget all fixes.
    pub fn reset(&mut self) {
        self.window.clear();
    }
}

/// Batch-averaged elevation gain/loss.
#[derive(Debug)]
pub struct ElevationFilter {
    batch_size: usize,
    buffer: Vec<f64>,
    /// Average of the last completed batch
    last_batch_average: Option<f64>,
}

impl ElevationFilter {
    /// Create a filter averaging `batch_size` readings per batch (at least 1).
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            last_batch_average: None,
        }
    }

    /// Add an altitude reading.
    ///
    /// Returns a non-zero delta only when a batch completes and a previous
    /// batch average exists.
    pub fn update(&mut self, altitude: f64) -> ElevationDelta {
        self.buffer.push(altitude);
        if self.buffer.len() < self.batch_size {
            return ElevationDelta::ZERO;
        }

        let batch_average = self.buffer.iter().sum::<f64>() / self.buffer.len() as f64;
        self.buffer.clear();

        let Some(previous) = self.last_batch_average.replace(batch_average) else {
            return ElevationDelta::ZERO;
        };

        let delta = batch_average - previous;
        if delta > 0.0 {
            ElevationDelta {
                gain: delta,
                loss: 0.0,
            }
        } else {
            ElevationDelta {
                gain: 0.0,
                loss: -delta,
            }
        }
    }

    /// Drop the partial batch and forget the previous batch average.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_batch_average = None;
    }
}

impl Default for ElevationFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ELEVATION_BATCH_SIZE)
    }
}
