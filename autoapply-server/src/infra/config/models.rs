use std::{path::PathBuf, time::Duration};

use autoapply_core::scheduler::SchedulerConfig;

pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerSettings,
    pub adapter: AdapterConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerSettings {
    pub tuning: SchedulerConfig,
    /// Start the scheduler as soon as the server is up.
    pub autostart: bool,
}

/// External automation command used by the process adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout: DEFAULT_ADAPTER_TIMEOUT,
        }
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
