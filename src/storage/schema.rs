//! Database schema definitions for the ride state store.

/// Key/value table holding checkpoints and remembered sensor targets.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Schema version tracking table.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;

pub const SELECT_VALUE: &str = "SELECT value FROM kv WHERE key = ?1";
pub const UPSERT_VALUE: &str = "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)";
pub const DELETE_VALUE: &str = "DELETE FROM kv WHERE key = ?1";
