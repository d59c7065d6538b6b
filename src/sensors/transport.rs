//! BLE transport capability and its btleplug backend.
//!
//! Every operation on [`BleTransport`] only *requests* work and returns
//! immediately; completions arrive later as [`TransportEvent`]s on the channel
//! handed to the backend at construction.

use crate::sensors::types::{GattService, LinkId, SensorError, TransportEvent};
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Non-blocking BLE central operations.
pub trait BleTransport: Send {
    /// Start scanning for peripherals advertising any of `services`.
    fn start_scan(&mut self, services: &[Uuid]) -> Result<(), SensorError>;

    /// Stop scanning.
    fn stop_scan(&mut self) -> Result<(), SensorError>;

    /// Request a connection to `address`. The returned link is used to tag all
    /// later events for this connection.
    fn connect(&mut self, address: &str) -> Result<LinkId, SensorError>;

    /// Request GATT service discovery on a connected link.
    fn discover_services(&mut self, link: LinkId) -> Result<(), SensorError>;

    /// Enable notifications for a characteristic.
    fn subscribe(
        &mut self,
        link: LinkId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), SensorError>;

    /// Write a descriptor of a characteristic.
    fn write_descriptor(
        &mut self,
        link: LinkId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), SensorError>;

    /// Request the link be disconnected. A `Disconnected` event follows.
    fn disconnect(&mut self, link: LinkId) -> Result<(), SensorError>;

    /// Release all resources held for a link. No further events are emitted for it.
    fn close(&mut self, link: LinkId);

    /// Resolves once every scan stop and disconnect requested so far has
    /// reached the adapter.
    fn drain(&mut self) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

impl<T: BleTransport + ?Sized> BleTransport for Box<T> {
    fn start_scan(&mut self, services: &[Uuid]) -> Result<(), SensorError> {
        (**self).start_scan(services)
    }

    fn stop_scan(&mut self) -> Result<(), SensorError> {
        (**self).stop_scan()
    }

    fn connect(&mut self, address: &str) -> Result<LinkId, SensorError> {
        (**self).connect(address)
    }

    fn discover_services(&mut self, link: LinkId) -> Result<(), SensorError> {
        (**self).discover_services(link)
    }

    fn subscribe(
        &mut self,
        link: LinkId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), SensorError> {
        (**self).subscribe(link, service, characteristic)
    }

    fn write_descriptor(
        &mut self,
        link: LinkId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), SensorError> {
        (**self).write_descriptor(link, characteristic, descriptor, value)
    }

    fn disconnect(&mut self, link: LinkId) -> Result<(), SensorError> {
        (**self).disconnect(link)
    }

    fn close(&mut self, link: LinkId) {
        (**self).close(link)
    }

    fn drain(&mut self) -> BoxFuture<'static, ()> {
        (**self).drain()
    }
}

/// Stand-in used when no adapter could be opened. Every request fails with
/// the original error, so the ride keeps running without sensors.
#[derive(Debug, Clone)]
pub struct UnavailableTransport {
    reason: SensorError,
}

impl UnavailableTransport {
    pub fn new(reason: SensorError) -> Self {
        Self { reason }
    }
}

impl BleTransport for UnavailableTransport {
    fn start_scan(&mut self, _services: &[Uuid]) -> Result<(), SensorError> {
        Err(self.reason.clone())
    }

    fn stop_scan(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn connect(&mut self, _address: &str) -> Result<LinkId, SensorError> {
        Err(self.reason.clone())
    }

    fn discover_services(&mut self, link: LinkId) -> Result<(), SensorError> {
        Err(SensorError::UnknownLink(link))
    }

    fn subscribe(
        &mut self,
        link: LinkId,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<(), SensorError> {
        Err(SensorError::UnknownLink(link))
    }

    fn write_descriptor(
        &mut self,
        link: LinkId,
        _characteristic: Uuid,
        _descriptor: Uuid,
        _value: &[u8],
    ) -> Result<(), SensorError> {
        Err(SensorError::UnknownLink(link))
    }

    fn disconnect(&mut self, link: LinkId) -> Result<(), SensorError> {
        Err(SensorError::UnknownLink(link))
    }

    fn close(&mut self, _link: LinkId) {}
}

/// One open link in the btleplug backend.
struct LinkEntry {
    peripheral: Peripheral,
    notifications: Option<JoinHandle<()>>,
}

/// Links known to the btleplug backend.
#[derive(Default)]
struct Links {
    open: HashMap<LinkId, LinkEntry>,
    /// Connect requested but not finished
    connecting: HashSet<LinkId>,
    /// Connecting links that were disconnected or closed before they opened
    cancelled: HashSet<LinkId>,
}

type LinkTable = Arc<Mutex<Links>>;

/// [`BleTransport`] backed by a btleplug adapter.
pub struct BtleplugTransport {
    adapter: Adapter,
    runtime: Handle,
    event_tx: UnboundedSender<TransportEvent>,
    links: LinkTable,
    next_link: AtomicU64,
    is_scanning: Arc<AtomicBool>,
    event_pump: JoinHandle<()>,
    /// Connect, scan stop and disconnect tasks that may still be running
    in_flight: Vec<JoinHandle<()>>,
}

impl BtleplugTransport {
    /// Initialize the BLE adapter at `adapter_index` and start forwarding
    /// adapter events to `event_tx`.
    pub async fn initialize(
        adapter_index: usize,
        event_tx: UnboundedSender<TransportEvent>,
    ) -> Result<Self, SensorError> {
        tracing::info!("Initializing BLE transport");

        let manager = Manager::new()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapter = adapters
            .into_iter()
            .nth(adapter_index)
            .ok_or(SensorError::AdapterNotFound)?;

        let events = adapter.events().await.map_err(map_btle_error)?;

        let links: LinkTable = Arc::new(Mutex::new(Links::default()));
        let is_scanning = Arc::new(AtomicBool::new(false));

        let event_pump = tokio::spawn(Self::pump_adapter_events(
            adapter.clone(),
            events,
            event_tx.clone(),
            links.clone(),
            is_scanning.clone(),
        ));

        tracing::info!("BLE adapter initialized");

        Ok(Self {
            adapter,
            runtime: Handle::current(),
            event_tx,
            links,
            next_link: AtomicU64::new(1),
            is_scanning,
            event_pump,
            in_flight: Vec::new(),
        })
    }

    /// Forward discovery and disconnect events for the life of the transport.
    async fn pump_adapter_events(
        adapter: Adapter,
        mut events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
        event_tx: UnboundedSender<TransportEvent>,
        links: LinkTable,
        is_scanning: Arc<AtomicBool>,
    ) {
        use futures::stream::StreamExt;

        while let Some(event) = events.next().await {
            match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                    if !is_scanning.load(Ordering::SeqCst) {
                        continue;
                    }
                    if let Some(discovered) = Self::describe_peripheral(&adapter, &id).await {
                        let _ = event_tx.send(discovered);
                    }
                }
                CentralEvent::DeviceDisconnected(id) => {
                    for link in Self::links_for(&links, &id) {
                        tracing::debug!("Adapter reported {} disconnected", link);
                        let _ = event_tx.send(TransportEvent::Disconnected { link });
                    }
                }
                _ => {}
            }
        }

        tracing::warn!("BLE adapter event stream ended");
        let _ = event_tx.send(TransportEvent::AdapterError(
            "adapter event stream ended".to_string(),
        ));
    }

    /// Build a discovery event from a peripheral's advertised properties.
    async fn describe_peripheral(adapter: &Adapter, id: &PeripheralId) -> Option<TransportEvent> {
        let peripheral = adapter.peripheral(id).await.ok()?;
        let properties = peripheral.properties().await.ok()??;

        Some(TransportEvent::Discovered {
            address: peripheral.id().to_string(),
            name: properties.local_name,
            rssi: properties.rssi,
            services: properties.services,
        })
    }

    fn links_for(links: &LinkTable, id: &PeripheralId) -> Vec<LinkId> {
        match links.lock() {
            Ok(table) => table
                .open
                .iter()
                .filter(|(_, entry)| &entry.peripheral.id() == id)
                .map(|(link, _)| *link)
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn peripheral(&self, link: LinkId) -> Result<Peripheral, SensorError> {
        self.links
            .lock()
            .map_err(|e| SensorError::BleError(e.to_string()))?
            .open
            .get(&link)
            .map(|entry| entry.peripheral.clone())
            .ok_or(SensorError::UnknownLink(link))
    }

    fn track(&mut self, handle: JoinHandle<()>) {
        self.in_flight.retain(|h| !h.is_finished());
        self.in_flight.push(handle);
    }

    /// Forward notifications of a connected peripheral until its stream ends.
    async fn forward_notifications(
        peripheral: Peripheral,
        link: LinkId,
        event_tx: UnboundedSender<TransportEvent>,
    ) {
        use futures::stream::StreamExt;

        let mut notification_stream = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to get notification stream for {}: {}", link, e);
                return;
            }
        };

        while let Some(notification) = notification_stream.next().await {
            let _ = event_tx.send(TransportEvent::Notification {
                link,
                characteristic: notification.uuid,
                value: notification.value,
            });
        }

        // Stream ended - peripheral disconnected
        let _ = event_tx.send(TransportEvent::Disconnected { link });
    }
}

impl BleTransport for BtleplugTransport {
    fn start_scan(&mut self, services: &[Uuid]) -> Result<(), SensorError> {
        if self.is_scanning.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!("Starting BLE scan for {} services", services.len());

        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();
        let is_scanning = self.is_scanning.clone();
        let scan_filter = ScanFilter {
            services: services.to_vec(),
        };

        self.runtime.spawn(async move {
            if let Err(e) = adapter.start_scan(scan_filter).await {
                tracing::error!("Failed to start scanning: {}", e);
                is_scanning.store(false, Ordering::SeqCst);
                let _ = event_tx.send(TransportEvent::AdapterError(
                    map_btle_error(e).to_string(),
                ));
            }
        });

        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), SensorError> {
        if !self.is_scanning.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!("Stopping BLE scan");

        let adapter = self.adapter.clone();
        let handle = self.runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                tracing::warn!("Failed to stop scanning: {}", e);
            }
        });
        self.track(handle);

        Ok(())
    }

    fn connect(&mut self, address: &str) -> Result<LinkId, SensorError> {
        let link = LinkId(self.next_link.fetch_add(1, Ordering::SeqCst));

        tracing::info!("Connecting to {} on {}", address, link);

        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();
        let links = self.links.clone();
        let runtime = self.runtime.clone();
        let address = address.to_string();

        if let Ok(mut table) = self.links.lock() {
            table.connecting.insert(link);
        }

        let handle = self.runtime.spawn(async move {
            let result = async {
                let peripheral = adapter
                    .peripherals()
                    .await
                    .map_err(map_btle_error)?
                    .into_iter()
                    .find(|p| p.id().to_string() == address)
                    .ok_or_else(|| SensorError::SensorNotFound(address.clone()))?;

                peripheral.connect().await.map_err(map_btle_error)?;
                Ok::<_, SensorError>(peripheral)
            }
            .await;

            match result {
                Ok(peripheral) => {
                    // Opening and cancelling are decided under one lock so a
                    // disconnect cannot slip in between.
                    let opened = match links.lock() {
                        Ok(mut table) => {
                            table.connecting.remove(&link);
                            if table.cancelled.remove(&link) {
                                false
                            } else {
                                let notifications = runtime.spawn(Self::forward_notifications(
                                    peripheral.clone(),
                                    link,
                                    event_tx.clone(),
                                ));
                                table.open.insert(
                                    link,
                                    LinkEntry {
                                        peripheral: peripheral.clone(),
                                        notifications: Some(notifications),
                                    },
                                );
                                true
                            }
                        }
                        Err(_) => false,
                    };

                    if opened {
                        let _ = event_tx.send(TransportEvent::Connected { link });
                    } else {
                        tracing::info!("{} was dropped while connecting, disconnecting", link);
                        if let Err(e) = peripheral.disconnect().await {
                            tracing::warn!("Disconnect of {} failed: {}", link, e);
                        }
                        let _ = event_tx.send(TransportEvent::Disconnected { link });
                    }
                }
                Err(e) => {
                    if let Ok(mut table) = links.lock() {
                        table.connecting.remove(&link);
                        table.cancelled.remove(&link);
                    }
                    let _ = event_tx.send(TransportEvent::LinkFailed {
                        link,
                        error: e.to_string(),
                    });
                }
            }
        });
        self.track(handle);

        Ok(link)
    }

    fn discover_services(&mut self, link: LinkId) -> Result<(), SensorError> {
        let peripheral = self.peripheral(link)?;
        let event_tx = self.event_tx.clone();

        self.runtime.spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(peripheral
                    .services()
                    .into_iter()
                    .map(|service| GattService {
                        uuid: service.uuid,
                        characteristics: service
                            .characteristics
                            .iter()
                            .map(|c| c.uuid)
                            .collect(),
                    })
                    .collect()),
                Err(e) => Err(e.to_string()),
            };
            let _ = event_tx.send(TransportEvent::ServicesDiscovered { link, result });
        });

        Ok(())
    }

    fn subscribe(
        &mut self,
        link: LinkId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), SensorError> {
        let peripheral = self.peripheral(link)?;
        let event_tx = self.event_tx.clone();

        self.runtime.spawn(async move {
            let found = peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == characteristic && c.service_uuid == service);

            let result = match found {
                Some(c) => peripheral.subscribe(&c).await.map_err(|e| e.to_string()),
                None => Err(format!("characteristic {} not found", characteristic)),
            };

            match result {
                Ok(()) => tracing::debug!("Subscribed to characteristic: {}", characteristic),
                Err(error) => {
                    let _ = event_tx.send(TransportEvent::LinkFailed { link, error });
                }
            }
        });

        Ok(())
    }

    fn write_descriptor(
        &mut self,
        link: LinkId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), SensorError> {
        let peripheral = self.peripheral(link)?;
        let event_tx = self.event_tx.clone();
        let value = value.to_vec();

        self.runtime.spawn(async move {
            let found = peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == characteristic)
                .and_then(|c| c.descriptors.into_iter().find(|d| d.uuid == descriptor));

            // Some backends hide the CCCD and manage it inside `subscribe`.
            let Some(d) = found else {
                tracing::debug!("Descriptor {} not exposed on {}", descriptor, characteristic);
                return;
            };

            if let Err(e) = peripheral.write_descriptor(&d, &value).await {
                let _ = event_tx.send(TransportEvent::LinkFailed {
                    link,
                    error: e.to_string(),
                });
            }
        });

        Ok(())
    }

    fn disconnect(&mut self, link: LinkId) -> Result<(), SensorError> {
        let peripheral = {
            let mut table = self
                .links
                .lock()
                .map_err(|e| SensorError::BleError(e.to_string()))?;

            if let Some(entry) = table.open.get(&link) {
                entry.peripheral.clone()
            } else if table.connecting.contains(&link) {
                // The connect task disconnects and reports once it finishes.
                tracing::info!("Cancelling {} while it connects", link);
                table.cancelled.insert(link);
                return Ok(());
            } else {
                return Err(SensorError::UnknownLink(link));
            }
        };
        let event_tx = self.event_tx.clone();

        tracing::info!("Disconnecting {}", link);

        let handle = self.runtime.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                tracing::warn!("Disconnect of {} failed: {}", link, e);
            }
            let _ = event_tx.send(TransportEvent::Disconnected { link });
        });
        self.track(handle);

        Ok(())
    }

    fn close(&mut self, link: LinkId) {
        let entry = match self.links.lock() {
            Ok(mut table) => {
                if table.connecting.contains(&link) {
                    table.cancelled.insert(link);
                }
                table.open.remove(&link)
            }
            Err(_) => None,
        };

        if let Some(mut entry) = entry {
            if let Some(handle) = entry.notifications.take() {
                handle.abort();
            }
            tracing::debug!("Closed {}", link);
        }
    }

    fn drain(&mut self) -> BoxFuture<'static, ()> {
        let pending: Vec<_> = self.in_flight.drain(..).collect();
        if !pending.is_empty() {
            tracing::debug!("Waiting for {} BLE requests to finish", pending.len());
        }
        Box::pin(async move {
            futures::future::join_all(pending).await;
        })
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.event_pump.abort();
    }
}

fn map_btle_error(e: btleplug::Error) -> SensorError {
    match e {
        btleplug::Error::PermissionDenied => SensorError::PermissionDenied,
        btleplug::Error::DeviceNotFound => SensorError::SensorNotFound(e.to_string()),
        other => SensorError::BleError(other.to_string()),
    }
}
