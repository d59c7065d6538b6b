//! Storage module for ride checkpoints and configuration.

pub mod config;
pub mod kv;
pub mod ride_state;
pub mod schema;

pub use config::{AppConfig, ConfigError};
pub use kv::{KeyValueStore, KvOp, MemoryStore, SqliteStore, StoreError};
pub use ride_state::RideStateStore;
