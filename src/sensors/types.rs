//! Sensor types and enums for the heart-rate monitor and rear radar.

use crate::sensors::protocol::{
    HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID, RADAR_DATA_UUID, RADAR_SERVICE_UUID,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Kind of peripheral the tracker knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Heart rate monitor (standard Heart Rate Service)
    HeartRate,
    /// Rear-approach radar (vendor service)
    Radar,
}

impl SensorKind {
    /// Both kinds, in a fixed order.
    pub const ALL: [SensorKind; 2] = [SensorKind::HeartRate, SensorKind::Radar];

    /// Advertised service that identifies this kind during a scan.
    pub fn service_uuid(self) -> Uuid {
        match self {
            SensorKind::HeartRate => HEART_RATE_SERVICE_UUID,
            SensorKind::Radar => RADAR_SERVICE_UUID,
        }
    }

    /// Characteristic carrying this kind's notifications.
    pub fn data_characteristic_uuid(self) -> Uuid {
        match self {
            SensorKind::HeartRate => HEART_RATE_MEASUREMENT_UUID,
            SensorKind::Radar => RADAR_DATA_UUID,
        }
    }

    /// Classify a peripheral from its advertised services.
    pub fn from_services(services: &[Uuid]) -> Option<Self> {
        if services.contains(&HEART_RATE_SERVICE_UUID) {
            Some(SensorKind::HeartRate)
        } else if services.contains(&RADAR_SERVICE_UUID) {
            Some(SensorKind::Radar)
        } else {
            None
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::HeartRate => write!(f, "Heart Rate"),
            SensorKind::Radar => write!(f, "Radar"),
        }
    }
}

impl std::str::FromStr for SensorKind {
    type Err = SensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hr" | "heart_rate" | "heartrate" => Ok(SensorKind::HeartRate),
            "radar" => Ok(SensorKind::Radar),
            _ => Err(SensorError::UnknownKind(s.to_string())),
        }
    }
}

/// Connection state of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Link requested or established, services not yet known
    Connecting,
    /// GATT services known, notifications not yet enabled
    ServicesDiscovered,
    /// Notification subscription requested and accepted by the transport.
    /// Samples are decoded from here on; a subscription that later fails
    /// arrives as a link failure and drops back to `Disconnected`.
    Active,
}

impl std::fmt::Display for SensorConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorConnectionState::Disconnected => write!(f, "disconnected"),
            SensorConnectionState::Connecting => write!(f, "connecting"),
            SensorConnectionState::ServicesDiscovered => write!(f, "connected"),
            SensorConnectionState::Active => write!(f, "active"),
        }
    }
}

/// A peripheral seen during the current scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScannedPeripheral {
    /// Advertised name, or "Unknown Device"
    pub name: String,
    /// BLE address/identifier
    pub address: String,
    /// Signal strength (RSSI)
    pub signal_strength: Option<i16>,
    /// Classified sensor kind
    pub kind: SensorKind,
}

/// Handle for one transport link, allocated by the transport on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// A GATT service as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

impl GattService {
    /// Whether this service is `service` and exposes `characteristic`.
    pub fn provides(&self, service: Uuid, characteristic: Uuid) -> bool {
        self.uuid == service && self.characteristics.contains(&characteristic)
    }
}

/// Asynchronous completions and unsolicited events from a BLE transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A peripheral advertisement was received while scanning
    Discovered {
        address: String,
        name: Option<String>,
        rssi: Option<i16>,
        services: Vec<Uuid>,
    },
    /// A link finished connecting
    Connected { link: LinkId },
    /// Service discovery completed on a link
    ServicesDiscovered {
        link: LinkId,
        result: Result<Vec<GattService>, String>,
    },
    /// A subscribed characteristic pushed a value
    Notification {
        link: LinkId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// A connect, subscribe or descriptor write failed on a link
    LinkFailed { link: LinkId, error: String },
    /// A link went down
    Disconnected { link: LinkId },
    /// The adapter reported a problem unrelated to any link
    AdapterError(String),
}

impl TransportEvent {
    /// The link this event belongs to, if any.
    pub fn link(&self) -> Option<LinkId> {
        match self {
            TransportEvent::Connected { link }
            | TransportEvent::ServicesDiscovered { link, .. }
            | TransportEvent::Notification { link, .. }
            | TransportEvent::LinkFailed { link, .. }
            | TransportEvent::Disconnected { link } => Some(*link),
            TransportEvent::Discovered { .. } | TransportEvent::AdapterError(_) => None,
        }
    }
}

/// Events published by the sensor layer to outside consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    /// A vehicle crossed into the radar alert distance
    RadarAlert { distance_m: u8 },
}

/// Errors that can occur in the sensor system.
#[derive(Debug, Clone, Error)]
pub enum SensorError {
    /// BLE adapter not found or unavailable
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    /// BLE is not enabled on the system
    #[error("Bluetooth is disabled")]
    BluetoothDisabled,

    /// Permission denied for Bluetooth access
    #[error("Bluetooth permission denied")]
    PermissionDenied,

    /// Sensor not found with given address
    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    /// Operation referenced a link the transport does not know
    #[error("Unknown link: {0}")]
    UnknownLink(LinkId),

    /// Unrecognised sensor kind name
    #[error("Unknown sensor kind: {0}")]
    UnknownKind(String),

    /// Generic BLE error
    #[error("BLE error: {0}")]
    BleError(String),
}
