//! BLE sensor discovery, connection management and payload decoding.

pub mod connection;
pub mod coordinator;
pub mod protocol;
pub mod transport;
pub mod types;

pub use connection::{ConnectionEvent, ConnectionOutcome, SensorConnection};
pub use coordinator::ScanCoordinator;
pub use protocol::{decode_heart_rate, decode_radar_threats, DecodeError};
pub use transport::{BleTransport, BtleplugTransport, UnavailableTransport};
pub use types::{
    GattService, LinkId, ScannedPeripheral, SensorConnectionState, SensorError, SensorEvent,
    SensorKind, TransportEvent,
};
