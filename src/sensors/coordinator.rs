//! Shared discovery scan and routing of peripherals to their connections.
//!
//! The coordinator is the only place that opens links. It remembers one
//! target address per sensor kind and reconnects to it whenever it shows up
//! in a scan. A user-initiated disconnect clears the target before the link
//! is dropped, so the disconnect handler can tell "user asked for this" from
//! "sensor dropped out".
//!
//! Scanning pauses while a link is connecting. Once no attempt is in flight,
//! the scan resumes for as long as any remembered sensor is still unlinked.

use crate::sensors::connection::{ConnectionEvent, ConnectionOutcome, SensorConnection};
use crate::sensors::transport::BleTransport;
use crate::sensors::types::{
    LinkId, ScannedPeripheral, SensorConnectionState, SensorError, SensorKind, TransportEvent,
};
use futures::future::BoxFuture;
use crate::state::repository::{ADAPTER_IDLE, ADAPTER_SCANNING};
use crate::state::RideRepository;
use crate::storage::ride_state::RideStateStore;

/// Name used for peripherals that do not advertise one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Owns the discovery scan and both sensor connections.
pub struct ScanCoordinator<T: BleTransport> {
    transport: T,
    heart_rate: SensorConnection,
    radar: SensorConnection,
    store: RideStateStore,
    repository: RideRepository,
    is_scanning: bool,
}

impl<T: BleTransport> ScanCoordinator<T> {
    /// Create a coordinator, restoring remembered targets from the store.
    pub fn new(
        transport: T,
        store: RideStateStore,
        repository: RideRepository,
        radar_alert_threshold_m: u8,
    ) -> Self {
        for kind in SensorKind::ALL {
            let target = store.load_target(kind);
            if let Some(address) = &target {
                tracing::info!("Remembered {} target: {}", kind, address);
            }
            repository.set_target(kind, target);
        }

        Self {
            transport,
            heart_rate: SensorConnection::new(SensorKind::HeartRate, repository.clone()),
            radar: SensorConnection::new(SensorKind::Radar, repository.clone())
                .with_alert_threshold(radar_alert_threshold_m),
            store,
            repository,
            is_scanning: false,
        }
    }

    /// Connection for a sensor kind.
    pub fn connection(&self, kind: SensorKind) -> &SensorConnection {
        match kind {
            SensorKind::HeartRate => &self.heart_rate,
            SensorKind::Radar => &self.radar,
        }
    }

    /// The transport, for inspection.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_scanning(&self) -> bool {
        self.is_scanning
    }

    /// Remembered target address for a kind.
    pub fn target(&self, kind: SensorKind) -> Option<String> {
        self.repository.target(kind)
    }

    /// Start scanning for both sensor services. Clears the previous results.
    pub fn start_scan(&mut self) -> Result<(), SensorError> {
        if self.is_scanning {
            return Ok(());
        }

        self.repository.clear_peripherals();

        let services: Vec<_> = SensorKind::ALL.iter().map(|k| k.service_uuid()).collect();
        match self.transport.start_scan(&services) {
            Ok(()) => {
                self.is_scanning = true;
                self.repository.set_adapter_status(ADAPTER_SCANNING.to_string());
                tracing::info!("Started scanning for heart rate and radar sensors");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to start scanning: {}", e);
                self.repository.set_adapter_status(e.to_string());
                Err(e)
            }
        }
    }

    /// Stop the discovery scan.
    pub fn stop_scan(&mut self) -> Result<(), SensorError> {
        if !self.is_scanning {
            return Ok(());
        }

        self.is_scanning = false;
        self.repository.set_adapter_status(ADAPTER_IDLE.to_string());
        self.transport.stop_scan()
    }

    /// Connect to a user-chosen peripheral and remember it as the target.
    pub fn connect(&mut self, address: &str, kind: SensorKind) {
        tracing::info!("User requested {} connection to {}", kind, address);
        self.set_target(kind, Some(address.to_string()));
        self.initiate_connection(kind, address);
    }

    /// Forget the target for a kind and drop its link.
    ///
    /// The target is cleared before the transport is asked to disconnect.
    pub fn disconnect(&mut self, kind: SensorKind) {
        tracing::info!("User requested {} disconnect", kind);
        self.set_target(kind, None);

        let Self {
            transport,
            heart_rate,
            radar,
            ..
        } = self;
        let connection = match kind {
            SensorKind::HeartRate => heart_rate,
            SensorKind::Radar => radar,
        };
        connection.request_disconnect(transport);
    }

    /// Apply one transport event.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Discovered {
                address,
                name,
                rssi,
                services,
            } => self.on_discovered(address, name, rssi, &services),
            TransportEvent::AdapterError(message) => {
                tracing::warn!("BLE adapter error: {}", message);
                self.is_scanning = false;
                self.repository.set_adapter_status(message);
            }
            other => {
                let Some(link) = other.link() else {
                    return;
                };
                self.route_link_event(link, other);
            }
        }
    }

    /// Stop scanning and release every open link.
    pub fn shutdown(&mut self) {
        tracing::info!("Shutting down scan coordinator");

        if let Err(e) = self.stop_scan() {
            tracing::warn!("Failed to stop scan during shutdown: {}", e);
        }

        let Self {
            transport,
            heart_rate,
            radar,
            ..
        } = self;
        heart_rate.abandon(transport);
        radar.abandon(transport);
    }

    /// Resolves once the transport has carried out the teardown requested by
    /// [`shutdown`](Self::shutdown).
    pub fn teardown(&mut self) -> BoxFuture<'static, ()> {
        self.transport.drain()
    }

    fn on_discovered(
        &mut self,
        address: String,
        name: Option<String>,
        rssi: Option<i16>,
        services: &[uuid::Uuid],
    ) {
        let Some(kind) = SensorKind::from_services(services) else {
            return;
        };

        self.repository.upsert_peripheral(ScannedPeripheral {
            name: name.unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string()),
            address: address.clone(),
            signal_strength: rssi,
            kind,
        });

        let is_target = self.repository.target(kind).as_deref() == Some(address.as_str());
        if is_target && self.connection(kind).is_idle() {
            tracing::info!("Auto-connecting to target {}: {}", kind, address);
            self.initiate_connection(kind, &address);
        }
    }

    fn route_link_event(&mut self, link: LinkId, event: TransportEvent) {
        let Some(kind) = SensorKind::ALL
            .into_iter()
            .find(|k| self.connection(*k).owns(link))
        else {
            self.on_stale_link_event(link, &event);
            return;
        };

        let Some(event) = ConnectionEvent::from_transport(event) else {
            return;
        };
        let was_connecting = self.connection(kind).state() == SensorConnectionState::Connecting;

        let outcome = {
            let Self {
                transport,
                heart_rate,
                radar,
                ..
            } = self;
            match kind {
                SensorKind::HeartRate => heart_rate.handle_event(event, transport),
                SensorKind::Radar => radar.handle_event(event, transport),
            }
        };

        if outcome == ConnectionOutcome::LinkLost {
            self.on_link_lost(kind);
        } else if was_connecting
            && self.connection(kind).state() != SensorConnectionState::Connecting
        {
            self.resume_scan_if_wanted();
        }
    }

    /// A link no connection owns. One that finishes opening after it was
    /// abandoned is released straight away.
    fn on_stale_link_event(&mut self, link: LinkId, event: &TransportEvent) {
        if !matches!(event, TransportEvent::Connected { .. }) {
            tracing::debug!("Ignoring event for stale {}", link);
            return;
        }

        tracing::info!("Releasing {} that opened after it was dropped", link);
        if let Err(e) = self.transport.disconnect(link) {
            tracing::debug!("Disconnect of stale {} failed: {}", link, e);
        }
        self.transport.close(link);
    }

    fn on_link_lost(&mut self, kind: SensorKind) {
        if self.repository.target(kind).is_some() {
            tracing::info!("{} sensor dropped out, scanning to reconnect", kind);
        } else {
            tracing::debug!("{} disconnected by user, not rescanning for it", kind);
        }
        self.resume_scan_if_wanted();
    }

    /// Scan while no link is connecting and a remembered sensor is unlinked.
    fn resume_scan_if_wanted(&mut self) {
        if self.is_scanning {
            return;
        }

        let connecting = SensorKind::ALL
            .into_iter()
            .any(|k| self.connection(k).state() == SensorConnectionState::Connecting);
        if connecting {
            return;
        }

        let Some(wanted) = SensorKind::ALL.into_iter().find(|k| {
            self.connection(*k).is_idle() && self.repository.target(*k).is_some()
        }) else {
            return;
        };

        tracing::info!("Scanning for remembered {} sensor", wanted);
        if let Err(e) = self.start_scan() {
            tracing::warn!("Could not resume scanning: {}", e);
        }
    }

    fn initiate_connection(&mut self, kind: SensorKind, address: &str) {
        // Scanning while connecting hurts radio reliability
        if let Err(e) = self.stop_scan() {
            tracing::warn!("Failed to stop scan before connecting: {}", e);
        }

        let Self {
            transport,
            heart_rate,
            radar,
            ..
        } = self;
        let connection = match kind {
            SensorKind::HeartRate => heart_rate,
            SensorKind::Radar => radar,
        };

        if !connection.is_idle() {
            connection.abandon(transport);
        }

        match transport.connect(address) {
            Ok(link) => connection.begin_connect(link, address),
            Err(e) => {
                tracing::warn!("Connection to {} {} failed: {}", kind, address, e);
                self.on_link_lost(kind);
            }
        }
    }

    fn set_target(&mut self, kind: SensorKind, address: Option<String>) {
        let saved = match &address {
            Some(address) => self.store.save_target(kind, address),
            None => self.store.clear_target(kind),
        };
        if let Err(e) = saved {
            tracing::warn!("Failed to persist {} target: {}", kind, e);
        }
        self.repository.set_target(kind, address);
    }
}
