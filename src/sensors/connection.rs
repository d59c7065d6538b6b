//! Per-peripheral connection state machine.
//!
//! A `SensorConnection` only moves to `Connecting` when the scan coordinator
//! hands it a freshly opened link. From there, transport completions are fed
//! in as [`ConnectionEvent`]s and drive it through service discovery,
//! subscription and live decoding.

use crate::sensors::protocol::{
    decode_heart_rate, decode_radar_threats, CLIENT_CHARACTERISTIC_CONFIG_UUID,
    ENABLE_NOTIFICATION_VALUE,
};
use crate::sensors::transport::BleTransport;
use crate::sensors::types::{
    GattService, LinkId, SensorConnectionState, SensorEvent, SensorKind, TransportEvent,
};
use crate::state::RideRepository;
use uuid::Uuid;

/// Default distance below which an approaching vehicle raises an alert.
pub const DEFAULT_RADAR_ALERT_THRESHOLD_M: u8 = 80;

/// Transport completions for one link, already routed to its connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The link finished connecting
    Connected,
    /// Service discovery finished
    ServicesDiscovered(Result<Vec<GattService>, String>),
    /// A characteristic notification arrived
    Notification { characteristic: Uuid, value: Vec<u8> },
    /// A connect, subscribe or descriptor write failed
    Failed(String),
    /// The link went down
    Disconnected,
}

impl ConnectionEvent {
    /// Convert a link-scoped transport event.
    pub fn from_transport(event: TransportEvent) -> Option<Self> {
        match event {
            TransportEvent::Connected { .. } => Some(ConnectionEvent::Connected),
            TransportEvent::ServicesDiscovered { result, .. } => {
                Some(ConnectionEvent::ServicesDiscovered(result))
            }
            TransportEvent::Notification {
                characteristic,
                value,
                ..
            } => Some(ConnectionEvent::Notification {
                characteristic,
                value,
            }),
            TransportEvent::LinkFailed { error, .. } => Some(ConnectionEvent::Failed(error)),
            TransportEvent::Disconnected { .. } => Some(ConnectionEvent::Disconnected),
            TransportEvent::Discovered { .. } | TransportEvent::AdapterError(_) => None,
        }
    }
}

/// What the coordinator needs to know after an event was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Nothing the coordinator must react to
    Continue,
    /// The link is gone and the connection is back to `Disconnected`
    LinkLost,
}

/// An open link and the address it was opened to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Link {
    id: LinkId,
    address: String,
}

/// State machine for one sensor kind.
#[derive(Debug)]
pub struct SensorConnection {
    kind: SensorKind,
    state: SensorConnectionState,
    link: Option<Link>,
    /// Closest distance from the previous radar sample, `None` when clear
    last_radar_distance: Option<u8>,
    radar_alert_threshold_m: u8,
    repository: RideRepository,
}

impl SensorConnection {
    /// Create a disconnected state machine for `kind`.
    pub fn new(kind: SensorKind, repository: RideRepository) -> Self {
        Self {
            kind,
            state: SensorConnectionState::Disconnected,
            link: None,
            last_radar_distance: None,
            radar_alert_threshold_m: DEFAULT_RADAR_ALERT_THRESHOLD_M,
            repository,
        }
    }

    /// Set the radar alert threshold in meters.
    pub fn with_alert_threshold(mut self, threshold_m: u8) -> Self {
        self.radar_alert_threshold_m = threshold_m;
        self
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn state(&self) -> SensorConnectionState {
        self.state
    }

    /// The link currently held, if any.
    pub fn link(&self) -> Option<LinkId> {
        self.link.as_ref().map(|l| l.id)
    }

    /// Address of the peripheral currently linked, if any.
    pub fn address(&self) -> Option<&str> {
        self.link.as_ref().map(|l| l.address.as_str())
    }

    /// Whether the connection can accept a new link.
    pub fn is_idle(&self) -> bool {
        self.state == SensorConnectionState::Disconnected
    }

    /// Whether `link` belongs to this connection.
    pub fn owns(&self, link: LinkId) -> bool {
        self.link() == Some(link)
    }

    /// Take ownership of a link the coordinator just opened.
    pub(crate) fn begin_connect(&mut self, link: LinkId, address: &str) {
        tracing::info!("{} sensor connecting to {} on {}", self.kind, address, link);
        self.link = Some(Link {
            id: link,
            address: address.to_string(),
        });
        self.set_state(SensorConnectionState::Connecting);
    }

    /// Ask the transport to drop the link. Cleanup happens on the
    /// `Disconnected` event.
    pub(crate) fn request_disconnect(&mut self, transport: &mut dyn BleTransport) {
        match self.link() {
            Some(link) => {
                if let Err(e) = transport.disconnect(link) {
                    tracing::warn!("{} disconnect request failed: {}", self.kind, e);
                    self.drop_link(transport);
                }
            }
            None => self.set_state(SensorConnectionState::Disconnected),
        }
    }

    /// Tear the link down immediately without waiting for the transport.
    pub(crate) fn abandon(&mut self, transport: &mut dyn BleTransport) {
        if let Some(link) = self.link() {
            let _ = transport.disconnect(link);
            self.drop_link(transport);
        }
    }

    /// Apply one transport completion.
    pub fn handle_event(
        &mut self,
        event: ConnectionEvent,
        transport: &mut dyn BleTransport,
    ) -> ConnectionOutcome {
        let Some(link) = self.link() else {
            return ConnectionOutcome::Continue;
        };

        match event {
            ConnectionEvent::Connected => {
                tracing::info!("{} sensor connected, discovering services", self.kind);
                if let Err(e) = transport.discover_services(link) {
                    tracing::warn!("{} service discovery request failed: {}", self.kind, e);
                    let _ = transport.disconnect(link);
                    self.drop_link(transport);
                    return ConnectionOutcome::LinkLost;
                }
                ConnectionOutcome::Continue
            }
            ConnectionEvent::ServicesDiscovered(Ok(services)) => {
                self.on_services_discovered(link, &services, transport)
            }
            ConnectionEvent::ServicesDiscovered(Err(e)) | ConnectionEvent::Failed(e) => {
                tracing::warn!("{} link failed: {}", self.kind, e);
                let _ = transport.disconnect(link);
                self.drop_link(transport);
                ConnectionOutcome::LinkLost
            }
            ConnectionEvent::Notification {
                characteristic,
                value,
            } => {
                if self.state == SensorConnectionState::Active
                    && characteristic == self.kind.data_characteristic_uuid()
                {
                    self.on_notification(&value);
                }
                ConnectionOutcome::Continue
            }
            ConnectionEvent::Disconnected => {
                tracing::info!("{} sensor disconnected", self.kind);
                self.drop_link(transport);
                ConnectionOutcome::LinkLost
            }
        }
    }

    fn on_services_discovered(
        &mut self,
        link: LinkId,
        services: &[GattService],
        transport: &mut dyn BleTransport,
    ) -> ConnectionOutcome {
        self.set_state(SensorConnectionState::ServicesDiscovered);

        let service_uuid = self.kind.service_uuid();
        let characteristic = self.kind.data_characteristic_uuid();

        if !services
            .iter()
            .any(|s| s.provides(service_uuid, characteristic))
        {
            tracing::warn!(
                "{} sensor does not expose characteristic {}",
                self.kind,
                characteristic
            );
            return ConnectionOutcome::Continue;
        }

        let subscribed = transport
            .subscribe(link, service_uuid, characteristic)
            .and_then(|()| {
                transport.write_descriptor(
                    link,
                    characteristic,
                    CLIENT_CHARACTERISTIC_CONFIG_UUID,
                    &ENABLE_NOTIFICATION_VALUE,
                )
            });

        match subscribed {
            Ok(()) => {
                tracing::info!("{} sensor active", self.kind);
                self.set_state(SensorConnectionState::Active);
                ConnectionOutcome::Continue
            }
            Err(e) => {
                tracing::warn!("{} subscription failed: {}", self.kind, e);
                let _ = transport.disconnect(link);
                self.drop_link(transport);
                ConnectionOutcome::LinkLost
            }
        }
    }

    fn on_notification(&mut self, value: &[u8]) {
        match self.kind {
            SensorKind::HeartRate => match decode_heart_rate(value) {
                Ok(bpm) => self.repository.set_heart_rate(Some(bpm)),
                Err(e) => tracing::debug!("Dropped heart rate sample: {}", e),
            },
            SensorKind::Radar => match decode_radar_threats(value) {
                Ok(closest) => {
                    self.evaluate_radar_alert(closest);
                    self.repository.set_radar_distance(closest);
                }
                Err(e) => tracing::debug!("Dropped radar sample: {}", e),
            },
        }
    }

    /// Fire once when the closest vehicle crosses into the threshold.
    fn evaluate_radar_alert(&mut self, closest: Option<u8>) {
        let threshold = self.radar_alert_threshold_m;
        let was_clear = self.last_radar_distance.map_or(true, |d| d >= threshold);
        let is_close = closest.is_some_and(|d| d < threshold);

        if was_clear && is_close {
            if let Some(distance_m) = closest {
                tracing::info!("Vehicle approaching at {} m", distance_m);
                self.repository
                    .publish_event(SensorEvent::RadarAlert { distance_m });
            }
        }

        self.last_radar_distance = closest;
    }

    fn drop_link(&mut self, transport: &mut dyn BleTransport) {
        if let Some(link) = self.link.take() {
            transport.close(link.id);
        }
        self.last_radar_distance = None;
        match self.kind {
            SensorKind::HeartRate => self.repository.set_heart_rate(None),
            SensorKind::Radar => self.repository.set_radar_distance(None),
        }
        self.set_state(SensorConnectionState::Disconnected);
    }

    fn set_state(&mut self, state: SensorConnectionState) {
        self.state = state;
        self.repository.set_sensor_status(self.kind, state);
    }
}
