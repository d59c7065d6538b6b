//! RideLink - live ride telemetry
//!
//! Fuses GPS fixes with a BLE heart rate monitor and a rear-facing bike radar
//! into one observable ride state, and checkpoints ride progress so a killed
//! process resumes where it left off.

pub mod app;
pub mod metrics;
pub mod recording;
pub mod sensors;
pub mod state;
pub mod storage;

// Re-export commonly used types
pub use app::{AppCommand, AppEvent, RideService};
pub use recording::session::RideSession;
pub use sensors::coordinator::ScanCoordinator;
pub use state::{RideRepository, RideSnapshot};
pub use storage::config::AppConfig;
