//! Single-owner event sequencer.
//!
//! All ride and sensor state is mutated from one task: `RideService::run`
//! drains [`AppEvent`]s (user commands, location fixes and BLE transport
//! completions) and drives the elapsed-time ticker while recording.

use crate::recording::clock::Clock;
use crate::recording::session::{RideSession, SessionConfig};
use crate::recording::types::LocationFix;
use crate::sensors::coordinator::ScanCoordinator;
use crate::sensors::transport::BleTransport;
use crate::sensors::types::{SensorError, SensorKind, TransportEvent};
use crate::state::RideRepository;
use crate::storage::config::AppConfig;
use crate::storage::ride_state::RideStateStore;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;

/// Upper bound on waiting for scan stops and disconnects at shutdown.
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// User commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    StartRide,
    PauseRide,
    ResetRide,
    AcknowledgeRecovery,
    StartScan,
    StopScan,
    Connect { address: String, kind: SensorKind },
    Disconnect(SensorKind),
    /// Stop scanning, release every link and end the sequencer
    Shutdown,
}

/// Everything the sequencer reacts to.
#[derive(Debug, Clone)]
pub enum AppEvent {
    Command(AppCommand),
    Location(LocationFix),
    /// The location provider gained (`true`) or lost its signal
    LocationAvailability(bool),
    Transport(TransportEvent),
}

impl From<AppCommand> for AppEvent {
    fn from(command: AppCommand) -> Self {
        AppEvent::Command(command)
    }
}

impl From<TransportEvent> for AppEvent {
    fn from(event: TransportEvent) -> Self {
        AppEvent::Transport(event)
    }
}

/// Owns the ride session and the scan coordinator.
pub struct RideService<T: BleTransport> {
    session: RideSession,
    coordinator: ScanCoordinator<T>,
    repository: RideRepository,
    tick_interval: Duration,
}

impl<T: BleTransport> RideService<T> {
    pub fn new(
        session: RideSession,
        coordinator: ScanCoordinator<T>,
        repository: RideRepository,
        tick_interval: Duration,
    ) -> Self {
        Self {
            session,
            coordinator,
            repository,
            tick_interval,
        }
    }

    /// Wire a service from configuration.
    pub fn from_config(
        config: &AppConfig,
        transport: T,
        store: RideStateStore,
        repository: RideRepository,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let session = RideSession::restore(
            SessionConfig {
                incline: config.metrics.incline_config(),
                elevation_batch_size: config.metrics.elevation_batch_size,
                failure_status_threshold: config.storage.failure_status_threshold,
            },
            store.clone(),
            repository.clone(),
            clock,
        );
        let coordinator = ScanCoordinator::new(
            transport,
            store,
            repository.clone(),
            config.sensors.radar_alert_threshold_m,
        );

        Self::new(
            session,
            coordinator,
            repository,
            Duration::from_millis(config.recording.tick_interval_ms.max(1)),
        )
    }

    pub fn session(&self) -> &RideSession {
        &self.session
    }

    pub fn coordinator(&self) -> &ScanCoordinator<T> {
        &self.coordinator
    }

    pub fn repository(&self) -> &RideRepository {
        &self.repository
    }

    /// Apply one event. Returns `false` once the service should stop.
    pub fn handle_event(&mut self, event: AppEvent) -> bool {
        match event {
            AppEvent::Command(command) => return self.handle_command(command),
            AppEvent::Location(fix) => self.session.on_location_fix(fix),
            AppEvent::LocationAvailability(available) => {
                self.session.on_location_availability(available)
            }
            AppEvent::Transport(event) => self.coordinator.handle_transport_event(event),
        }
        true
    }

    fn handle_command(&mut self, command: AppCommand) -> bool {
        tracing::debug!("Command: {:?}", command);
        match command {
            AppCommand::StartRide => self.session.start(),
            AppCommand::PauseRide => self.session.pause(),
            AppCommand::ResetRide => self.session.reset(),
            AppCommand::AcknowledgeRecovery => self.session.acknowledge_recovery(),
            AppCommand::StartScan => {
                if let Err(e) = self.coordinator.start_scan() {
                    tracing::warn!("Scan not started: {}", e);
                }
            }
            AppCommand::StopScan => {
                if let Err(e) = self.coordinator.stop_scan() {
                    tracing::warn!("Scan not stopped: {}", e);
                }
            }
            AppCommand::Connect { address, kind } => self.coordinator.connect(&address, kind),
            AppCommand::Disconnect(kind) => self.coordinator.disconnect(kind),
            AppCommand::Shutdown => return false,
        }
        true
    }

    /// Process events until `Shutdown` or until every sender is dropped, then
    /// release all BLE resources and wait up to [`TEARDOWN_TIMEOUT`] for the
    /// adapter to catch up.
    ///
    /// The elapsed-time ticker is only polled while recording.
    pub async fn run(&mut self, mut events: UnboundedReceiver<AppEvent>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();

        tracing::info!("Ride service running");

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("Event channel closed");
                        break;
                    };

                    let was_recording = self.session.is_recording();
                    if !self.handle_event(event) {
                        break;
                    }
                    if !was_recording && self.session.is_recording() {
                        ticker.reset();
                    }
                }
                _ = ticker.tick(), if self.session.is_recording() => {
                    self.session.tick();
                }
            }
        }

        self.coordinator.shutdown();
        if tokio::time::timeout(TEARDOWN_TIMEOUT, self.coordinator.teardown())
            .await
            .is_err()
        {
            tracing::warn!("BLE teardown did not finish within {:?}", TEARDOWN_TIMEOUT);
        }
        tracing::info!("Ride service stopped");
    }
}

/// One line of text input: a JSON location fix or a command word.
#[derive(Debug, Clone)]
pub enum InputLine {
    Event(AppEvent),
    /// Print the current snapshot
    Status,
}

/// Input line parse errors.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Empty input")]
    Empty,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid location fix: {0}")]
    InvalidFix(String),

    #[error(transparent)]
    Sensor(#[from] SensorError),
}

impl FromStr for InputLine {
    type Err = InputError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(InputError::Empty);
        }

        if line.starts_with('{') {
            let fix: LocationFix =
                serde_json::from_str(line).map_err(|e| InputError::InvalidFix(e.to_string()))?;
            return Ok(InputLine::Event(AppEvent::Location(fix)));
        }

        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default();

        let command = match command {
            "start" => AppCommand::StartRide,
            "pause" | "stop" => AppCommand::PauseRide,
            "reset" => AppCommand::ResetRide,
            "ack" => AppCommand::AcknowledgeRecovery,
            "scan" => AppCommand::StartScan,
            "stop-scan" => AppCommand::StopScan,
            "connect" => {
                let kind = words
                    .next()
                    .ok_or(InputError::MissingArgument("sensor kind"))?
                    .parse::<SensorKind>()?;
                let address = words
                    .next()
                    .ok_or(InputError::MissingArgument("address"))?
                    .to_string();
                AppCommand::Connect { address, kind }
            }
            "disconnect" => AppCommand::Disconnect(
                words
                    .next()
                    .ok_or(InputError::MissingArgument("sensor kind"))?
                    .parse::<SensorKind>()?,
            ),
            "gps-lost" => return Ok(InputLine::Event(AppEvent::LocationAvailability(false))),
            "status" => return Ok(InputLine::Status),
            "quit" | "exit" => AppCommand::Shutdown,
            other => return Err(InputError::UnknownCommand(other.to_string())),
        };

        Ok(InputLine::Event(AppEvent::Command(command)))
    }
}
