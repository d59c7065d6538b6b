//! Ride metrics derived from GPS fixes.

pub mod geo;
pub mod smoothing;

pub use geo::haversine_distance;
pub use smoothing::{ElevationFilter, InclineConfig, InclineFilter, InclineMode};
