use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use url::Url;

use autoapply_core::{SchedulerError, scheduler::SchedulerConfig};

use super::{
    models::{
        AdapterConfig, Config, ConfigMetadata, DatabaseConfig, SchedulerSettings, ServerConfig,
    },
    sources::{EnvConfig, FileConfig, FileSchedulerConfig},
    validation::{self, ConfigWarnings},
};

const DEFAULT_CONFIG_LOCATION: &str = "autoapply.toml";

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

/// Layers defaults, an optional TOML file and the environment, in that
/// order of increasing precedence.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Loads `.env` (a missing file is fine), then resolves against the
    /// process environment.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let mut load = self.load_from(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Resolves against an already gathered environment.
    pub fn load_from(&self, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let config = compose_config(file_config, env, config_path)?;

        let mut warnings = ConfigWarnings::default();
        if config.metadata.config_path.is_none() {
            warnings.push_with_hint(
                "No autoapply.toml detected; using defaults and environment variables",
                "Pass --config or set AUTOAPPLY_CONFIG to load a configuration file",
            );
        }
        warnings.extend(validation::collect_warnings(&config));

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let (path, explicit) = match (&self.options.config_path, &env.config_path) {
            (Some(path), _) | (None, Some(path)) => (path.clone(), true),
            (None, None) => (PathBuf::from(DEFAULT_CONFIG_LOCATION), false),
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;

        Ok((Some(file_config), Some(path)))
    }
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        server: file_server,
        database: file_database,
        scheduler: file_scheduler,
        adapter: file_adapter,
    } = file_config.unwrap_or_default();

    let server_defaults = ServerConfig::default();
    let server = ServerConfig {
        host: env
            .server_host
            .clone()
            .or(file_server.host)
            .unwrap_or(server_defaults.host),
        port: env
            .server_port
            .or(file_server.port)
            .unwrap_or(server_defaults.port),
    };

    let database_defaults = DatabaseConfig::default();
    let database = DatabaseConfig {
        url: resolve_database_url(env.database_url.clone().or(file_database.url))?,
        max_connections: env
            .database_max_connections
            .or(file_database.max_connections)
            .unwrap_or(database_defaults.max_connections),
    };

    let scheduler = compose_scheduler(&env, file_scheduler)?;

    let adapter = AdapterConfig {
        command: env
            .adapter_command
            .clone()
            .or(file_adapter.command)
            .filter(|command| !command.trim().is_empty()),
        args: env
            .adapter_args
            .clone()
            .or(file_adapter.args)
            .unwrap_or_default(),
        timeout: match env.adapter_timeout.as_deref().or(file_adapter.timeout.as_deref()) {
            Some(raw) => parse_duration("adapter.timeout", raw)?,
            None => AdapterConfig::default().timeout,
        },
    };

    Ok(Config {
        server,
        database,
        scheduler,
        adapter,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded: false,
        },
    })
}

fn compose_scheduler(
    env: &EnvConfig,
    file: FileSchedulerConfig,
) -> Result<SchedulerSettings, ConfigLoadError> {
    let defaults = SchedulerConfig::default();

    let millis = |key: &'static str,
                  env_value: Option<&str>,
                  file_value: Option<&str>,
                  default: u64|
     -> Result<u64, ConfigLoadError> {
        match env_value.or(file_value) {
            Some(raw) => Ok(duration_millis(parse_duration(key, raw)?)),
            None => Ok(default),
        }
    };

    let tuning = SchedulerConfig {
        pool_size: env
            .scheduler_pool_size
            .or(file.pool_size)
            .unwrap_or(defaults.pool_size),
        channel_capacity: env
            .scheduler_channel_capacity
            .or(file.channel_capacity)
            .unwrap_or(defaults.channel_capacity),
        poll_interval_ms: millis(
            "scheduler.poll_interval",
            env.scheduler_poll_interval.as_deref(),
            file.poll_interval.as_deref(),
            defaults.poll_interval_ms,
        )?,
        inflight_multiple: env
            .scheduler_inflight_multiple
            .or(file.inflight_multiple)
            .unwrap_or(defaults.inflight_multiple),
        receive_timeout_ms: millis(
            "scheduler.receive_timeout",
            env.scheduler_receive_timeout.as_deref(),
            file.receive_timeout.as_deref(),
            defaults.receive_timeout_ms,
        )?,
        dispatcher_join_grace_ms: millis(
            "scheduler.dispatcher_join_grace",
            None,
            file.dispatcher_join_grace.as_deref(),
            defaults.dispatcher_join_grace_ms,
        )?,
        worker_join_timeout_ms: millis(
            "scheduler.worker_join_timeout",
            env.scheduler_worker_join_timeout.as_deref(),
            file.worker_join_timeout.as_deref(),
            defaults.worker_join_timeout_ms,
        )?,
        default_priority: env
            .scheduler_default_priority
            .or(file.default_priority)
            .unwrap_or(defaults.default_priority),
        default_max_retries: env
            .scheduler_default_max_retries
            .or(file.default_max_retries)
            .unwrap_or(defaults.default_max_retries),
        claim_conflict_retries: file
            .claim_conflict_retries
            .unwrap_or(defaults.claim_conflict_retries),
    };
    tuning.validate().map_err(ConfigLoadError::Scheduler)?;

    Ok(SchedulerSettings {
        tuning,
        autostart: env.scheduler_autostart.or(file.autostart).unwrap_or(false),
    })
}

fn resolve_database_url(raw: Option<String>) -> Result<Option<String>, ConfigLoadError> {
    let Some(raw) = raw.filter(|value| !value.trim().is_empty()) else {
        return Ok(None);
    };
    let parsed = Url::parse(raw.trim())
        .map_err(|source| ConfigLoadError::InvalidDatabaseUrl { source })?;
    if !matches!(parsed.scheme(), "postgres" | "postgresql") {
        return Err(ConfigLoadError::UnsupportedDatabaseScheme {
            scheme: parsed.scheme().to_string(),
        });
    }
    Ok(Some(raw.trim().to_string()))
}

fn parse_duration(key: &'static str, raw: &str) -> Result<Duration, ConfigLoadError> {
    humantime::parse_duration(raw.trim()).map_err(|source| ConfigLoadError::InvalidDuration {
        key,
        value: raw.to_string(),
        source,
    })
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid database URL")]
    InvalidDatabaseUrl {
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported database scheme '{scheme}'; expected postgres:// or postgresql://")]
    UnsupportedDatabaseScheme { scheme: String },
    #[error("invalid duration for {key}: '{value}'")]
    InvalidDuration {
        key: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error(transparent)]
    Scheduler(SchedulerError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoad {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.metadata.config_path.as_deref()
    }
}
