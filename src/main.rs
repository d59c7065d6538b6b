//! RideLink - headless ride telemetry daemon
//!
//! Reads newline-delimited input on stdin: JSON location fixes such as
//! `{"latitude":52.1,"longitude":4.3,"altitude":12.0,"timestamp_ms":1700000000000}`
//! or one of the commands `start`, `pause`, `reset`, `ack`, `scan`,
//! `stop-scan`, `connect <hr|radar> <address>`, `disconnect <hr|radar>`,
//! `gps-lost`, `status` and `quit`.

use anyhow::Context;
use ridelink::app::{AppCommand, AppEvent, InputLine, RideService};
use ridelink::recording::clock::SystemClock;
use ridelink::sensors::transport::{BleTransport, BtleplugTransport, UnavailableTransport};
use ridelink::sensors::types::{SensorEvent, TransportEvent};
use ridelink::state::RideRepository;
use ridelink::storage::config::load_config;
use ridelink::storage::ride_state::RideStateStore;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting RideLink v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config().context("loading configuration")?;
    let database_path = config.database_path();
    let store = RideStateStore::open(&database_path)
        .with_context(|| format!("opening ride state at {}", database_path.display()))?
        .with_write_attempts(config.storage.write_attempts);

    let repository = RideRepository::new();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<AppEvent>();

    let transport = open_transport(config.sensors.adapter_index, event_tx.clone()).await;

    let mut service = RideService::from_config(
        &config,
        transport,
        store,
        repository.clone(),
        Arc::new(SystemClock),
    );

    spawn_alert_listener(&repository);
    spawn_stdin_reader(event_tx.clone(), repository.clone());

    // Look for remembered sensors straight away.
    let _ = event_tx.send(AppCommand::StartScan.into());
    drop(event_tx);

    service.run(event_rx).await;

    tracing::info!("RideLink stopped");
    Ok(())
}

/// Open the BLE adapter, falling back to a transport that reports why it is
/// unavailable.
async fn open_transport(
    adapter_index: usize,
    event_tx: UnboundedSender<AppEvent>,
) -> Box<dyn BleTransport> {
    let (transport_tx, mut transport_rx) = mpsc::unbounded_channel::<TransportEvent>();

    match BtleplugTransport::initialize(adapter_index, transport_tx).await {
        Ok(transport) => {
            tokio::spawn(async move {
                while let Some(event) = transport_rx.recv().await {
                    if event_tx.send(AppEvent::Transport(event)).is_err() {
                        break;
                    }
                }
            });
            Box::new(transport)
        }
        Err(e) => {
            tracing::error!("Bluetooth unavailable, continuing without sensors: {}", e);
            Box::new(UnavailableTransport::new(e))
        }
    }
}

/// Ring the terminal bell for every radar alert.
fn spawn_alert_listener(repository: &RideRepository) {
    let alerts = repository.alert_receiver();

    std::thread::spawn(move || {
        for event in alerts.iter() {
            match event {
                SensorEvent::RadarAlert { distance_m } => {
                    tracing::warn!("Vehicle approaching: {} m", distance_m);
                    let mut stderr = std::io::stderr();
                    let _ = stderr.write_all(b"\x07");
                    let _ = stderr.flush();
                }
            }
        }
    });
}

/// Feed stdin lines into the sequencer on a dedicated thread. EOF shuts the
/// service down.
fn spawn_stdin_reader(event_tx: UnboundedSender<AppEvent>, repository: RideRepository) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();

        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    break;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            match line.parse::<InputLine>() {
                Ok(InputLine::Status) => match serde_json::to_string(&repository.snapshot()) {
                    Ok(json) => println!("{}", json),
                    Err(e) => tracing::error!("Failed to serialize snapshot: {}", e),
                },
                Ok(InputLine::Event(event)) => {
                    if event_tx.send(event).is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!("Ignoring input: {}", e),
            }
        }

        let _ = event_tx.send(AppCommand::Shutdown.into());
    });
}
