//! Storage configuration.

use serde::Deserialize;

/// SQLite storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub path: String,
    /// Maximum number of pooled connections.
    pub max_connections: Option<u32>,
}
