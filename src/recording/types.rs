//! Ride data model: location fixes, totals and recording state.

use serde::{Deserialize, Serialize};

/// State of the ride recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    /// No ride in progress
    #[default]
    Idle,
    /// Fixes contribute to the totals
    Recording,
    /// Ride in progress but not accumulating
    Paused,
}

impl RecordingState {
    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingState::Recording)
    }
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingState::Idle => write!(f, "idle"),
            RecordingState::Recording => write!(f, "recording"),
            RecordingState::Paused => write!(f, "paused"),
        }
    }
}

/// One GPS position report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude in meters
    #[serde(default)]
    pub altitude: f64,
    /// Ground speed in m/s, when the receiver reports one
    #[serde(default)]
    pub speed: Option<f64>,
    /// Unix time in milliseconds
    pub timestamp_ms: i64,
}

/// Accumulated ride progress. This is what gets checkpointed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RideTotals {
    /// Distance covered in meters
    pub distance_m: f64,
    /// Elevation gained in meters
    pub elevation_gain_m: f64,
    /// Elevation lost in meters (positive)
    pub elevation_loss_m: f64,
    /// Elapsed time folded in from previous recording segments
    pub elapsed_offset_ms: i64,
}

/// Gain/loss reported by one elevation filter update. At most one side is non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ElevationDelta {
    pub gain: f64,
    pub loss: f64,
}

impl ElevationDelta {
    pub const ZERO: ElevationDelta = ElevationDelta {
        gain: 0.0,
        loss: 0.0,
    };
}
