/// Configuration management for the blockway engine
///
/// Handles server configuration, storage location, and engine limits.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Execution engine limits
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding blockway.db (DAG documents, projects, config values)
    pub data_dir: String,
}

/// Execution engine limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Activations allowed per block per run before the cycle guard trips
    pub max_visits: u32,
    /// Default per-invocation timeout in milliseconds, 0 disables it
    pub block_timeout_ms: u64,
    /// Lowest status code counted as success
    pub success_min: u16,
    /// Highest status code counted as success
    pub success_max: u16,
    /// Project slug config lookups resolve against
    pub config_scope: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("BLOCKWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("BLOCKWAY_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("BLOCKWAY_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            },
            engine: EngineConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_visits: env_or("BLOCKWAY_MAX_VISITS", 16),
            block_timeout_ms: env_or("BLOCKWAY_BLOCK_TIMEOUT_MS", 30_000),
            success_min: env_or("BLOCKWAY_SUCCESS_MIN", 200),
            success_max: env_or("BLOCKWAY_SUCCESS_MAX", 299),
            config_scope: std::env::var("BLOCKWAY_CONFIG_SCOPE")
                .unwrap_or_else(|_| "default".to_string()),
        }
    }
}
