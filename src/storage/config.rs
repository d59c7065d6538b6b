//! Application configuration loaded from TOML.

use crate::metrics::smoothing::{
    InclineConfig, InclineMode, DEFAULT_ELEVATION_BATCH_SIZE, DEFAULT_INCLINE_WINDOW,
    DEFAULT_MIN_INCLINE_DISTANCE_M,
};
use crate::sensors::connection::DEFAULT_RADAR_ALERT_THRESHOLD_M;
use crate::storage::ride_state::DEFAULT_WRITE_ATTEMPTS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Sensor settings
    pub sensors: SensorSettings,
    /// Ride metrics settings
    pub metrics: MetricsSettings,
    /// Recording settings
    pub recording: RecordingSettings,
    /// Persistence settings
    pub storage: StorageSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            sensors: SensorSettings::default(),
            metrics: MetricsSettings::default(),
            recording: RecordingSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl AppConfig {
    /// Full path of the ride state database.
    pub fn database_path(&self) -> PathBuf {
        let file = Path::new(&self.storage.database_file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.data_dir.join(file)
        }
    }
}

/// Sensor-related settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Radar alert fires when a vehicle comes closer than this (meters)
    pub radar_alert_threshold_m: u8,
    /// Which BLE adapter to use
    pub adapter_index: usize,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            radar_alert_threshold_m: DEFAULT_RADAR_ALERT_THRESHOLD_M,
            adapter_index: 0,
        }
    }
}

/// Smoothing filter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Incline window size in fixes
    pub incline_window: usize,
    /// Incline evaluation mode
    pub incline_mode: InclineMode,
    /// Minimum run before an incline is reported (meters)
    pub min_incline_distance_m: f64,
    /// Altitude readings per elevation batch
    pub elevation_batch_size: usize,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            incline_window: DEFAULT_INCLINE_WINDOW,
            incline_mode: InclineMode::FullWindow,
            min_incline_distance_m: DEFAULT_MIN_INCLINE_DISTANCE_M,
            elevation_batch_size: DEFAULT_ELEVATION_BATCH_SIZE,
        }
    }
}

impl MetricsSettings {
    pub fn incline_config(&self) -> InclineConfig {
        InclineConfig {
            window: self.incline_window,
            mode: self.incline_mode,
            min_distance_m: self.min_incline_distance_m,
        }
    }
}

/// Recording-related settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Elapsed time publish interval while recording
    pub tick_interval_ms: u64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Database file, relative to the data directory unless absolute
    pub database_file: String,
    /// Attempts per checkpoint write
    pub write_attempts: u32,
    /// Consecutive failed checkpoints before a status is published
    pub failure_status_threshold: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_file: "ride_state.db".to_string(),
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
            failure_status_threshold: 3,
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "ridelink", "RideLink")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the default location, writing the
/// defaults there on first run.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut config = load_or_create_config(&get_config_path())?;
    config.data_dir = get_data_dir();
    Ok(config)
}

/// Load configuration from `path`. When the file is missing, the defaults are
/// saved there so they can be edited. Failing to save them is not fatal.
pub fn load_or_create_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if path.exists() {
        return load_config_from(path);
    }

    let config = load_config_from(path)?;
    match save_config_to(&config, path) {
        Ok(()) => tracing::info!("Wrote default configuration to {}", path.display()),
        Err(e) => tracing::warn!("Could not write default configuration: {}", e),
    }
    Ok(config)
}

/// Load configuration from `path`. A missing file yields defaults.
///
/// `data_dir` is set to the file's directory.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let data_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if !path.exists() {
        return Ok(AppConfig {
            data_dir,
            ..Default::default()
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let mut config: AppConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.data_dir = data_dir;

    Ok(config)
}

/// Save configuration to `path`.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
