use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub scheduler: FileSchedulerConfig,
    #[serde(default)]
    pub adapter: FileAdapterConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

/// Durations are humantime strings such as `"5s"` or `"15m"`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSchedulerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inflight_multiple: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receive_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatcher_join_grace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_join_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_conflict_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autostart: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileAdapterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub database_max_connections: Option<u32>,
    pub scheduler_pool_size: Option<usize>,
    pub scheduler_channel_capacity: Option<usize>,
    pub scheduler_poll_interval: Option<String>,
    pub scheduler_inflight_multiple: Option<f64>,
    pub scheduler_receive_timeout: Option<String>,
    pub scheduler_worker_join_timeout: Option<String>,
    pub scheduler_default_priority: Option<i32>,
    pub scheduler_default_max_retries: Option<u32>,
    pub scheduler_autostart: Option<bool>,
    pub adapter_command: Option<String>,
    pub adapter_args: Option<Vec<String>>,
    pub adapter_timeout: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Self {
            config_path: var("AUTOAPPLY_CONFIG").map(PathBuf::from),
            server_host: var("SERVER_HOST"),
            server_port: parse_var(var("SERVER_PORT")),
            database_url: var("DATABASE_URL"),
            database_max_connections: parse_var(var("DATABASE_MAX_CONNECTIONS")),
            scheduler_pool_size: parse_var(var("SCHEDULER_POOL_SIZE")),
            scheduler_channel_capacity: parse_var(var("SCHEDULER_CHANNEL_CAPACITY")),
            scheduler_poll_interval: var("SCHEDULER_POLL_INTERVAL"),
            scheduler_inflight_multiple: parse_var(var("SCHEDULER_INFLIGHT_MULTIPLE")),
            scheduler_receive_timeout: var("SCHEDULER_RECEIVE_TIMEOUT"),
            scheduler_worker_join_timeout: var("SCHEDULER_WORKER_JOIN_TIMEOUT"),
            scheduler_default_priority: parse_var(var("SCHEDULER_DEFAULT_PRIORITY")),
            scheduler_default_max_retries: parse_var(var("SCHEDULER_DEFAULT_MAX_RETRIES")),
            scheduler_autostart: var("SCHEDULER_AUTOSTART").and_then(|raw| parse_bool(&raw)),
            adapter_command: var("ADAPTER_COMMAND"),
            adapter_args: var("ADAPTER_ARGS").map(|raw| parse_args(&raw)),
            adapter_timeout: var("ADAPTER_TIMEOUT"),
        }
    }
}

fn parse_var<T: std::str::FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|value| value.trim().parse().ok())
}

/// Whitespace-separated argument list.
fn parse_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
