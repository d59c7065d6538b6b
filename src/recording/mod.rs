//! Ride recording: session state machine, clock and data model.

pub mod clock;
pub mod session;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use session::{RideSession, SessionConfig};
pub use types::{ElevationDelta, LocationFix, RecordingState, RideTotals};
