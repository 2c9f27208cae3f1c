/// Configuration management for the Flowloom engine
///
/// Handles server binding, the persistence backend and runtime parameters.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Engine runtime configuration
    pub runtime: RuntimeConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Persistence backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL (e.g., "sqlite://data/flowloom.db"), or "memory"
    /// for the process-local gateway
    pub url: String,
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url == "memory"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Seconds-resolution cron expression driving schedule evaluation
    pub scheduler_tick: String,
    /// Reclaim orphaned and pending executions at startup
    pub recover_on_start: bool,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("FLOWLOOM_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("FLOWLOOM_PORT")
                    .unwrap_or_else(|_| "3004".to_string())
                    .parse()
                    .unwrap_or(3004),
            },
            database: DatabaseConfig {
                url: std::env::var("FLOWLOOM_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/flowloom.db".to_string()),
            },
            runtime: RuntimeConfig {
                scheduler_tick: std::env::var("FLOWLOOM_SCHEDULER_TICK")
                    .unwrap_or_else(|_| "*/5 * * * * *".to_string()),
                recover_on_start: std::env::var("FLOWLOOM_RECOVER_ON_START")
                    .map(|value| !matches!(value.to_lowercase().as_str(), "false" | "0" | "no"))
                    .unwrap_or(true),
            },
        }
    }
}
