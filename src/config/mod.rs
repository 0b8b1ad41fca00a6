//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, str::FromStr};

use clap::{Args, Parser, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tavola";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DATA_ROOT: &str = "data";
const DEFAULT_SNAPSHOT_FILE: &str = "tavola-snapshot.json";
const DEFAULT_TABLE_LIMIT: usize = 16;
const DEFAULT_PAGE_LIMIT: usize = 50;
const DEFAULT_VALIDATOR_COMMAND: &str = "tavola-check";
const DEFAULT_VALIDATOR_SLOTS: usize = 1;

/// Command-line arguments for the Tavola binary.
#[derive(Debug, Parser)]
#[command(name = "tavola", version, about = "Tavola table view server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TAVOLA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the data directory holding items/ and routes/.
    #[arg(long = "data-root", value_name = "PATH")]
    pub data_root: Option<PathBuf>,

    /// Override the cache snapshot file written on SIGUSR2.
    #[arg(long = "data-snapshot-file", value_name = "PATH")]
    pub data_snapshot_file: Option<PathBuf>,

    /// Override the number of cached tables.
    #[arg(long = "cache-table-limit", value_name = "COUNT")]
    pub cache_table_limit: Option<usize>,

    /// Override the default page size.
    #[arg(long = "cache-default-page-limit", value_name = "COUNT")]
    pub cache_default_page_limit: Option<usize>,

    /// Override the validation checker command.
    #[arg(long = "validator-command", value_name = "COMMAND")]
    pub validator_command: Option<String>,

    /// Override the number of concurrent validation runs.
    #[arg(long = "validator-slots", value_name = "COUNT")]
    pub validator_slots: Option<usize>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub data: DataSettings,
    pub cache: CacheSettings,
    pub validator: ValidatorSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DataSettings {
    pub root: PathBuf,
    pub snapshot_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub table_limit: NonZeroUsize,
    pub default_page_limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct ValidatorSettings {
    pub command: String,
    pub slots: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("TAVOLA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    data: RawDataSettings,
    cache: RawCacheSettings,
    validator: RawValidatorSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(root) = overrides.data_root.as_ref() {
            self.data.root = Some(root.clone());
        }
        if let Some(file) = overrides.data_snapshot_file.as_ref() {
            self.data.snapshot_file = Some(file.clone());
        }
        if let Some(limit) = overrides.cache_table_limit {
            self.cache.table_limit = Some(limit);
        }
        if let Some(limit) = overrides.cache_default_page_limit {
            self.cache.default_page_limit = Some(limit);
        }
        if let Some(command) = overrides.validator_command.as_ref() {
            self.validator.command = Some(command.clone());
        }
        if let Some(slots) = overrides.validator_slots {
            self.validator.slots = Some(slots);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            data,
            cache,
            validator,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            data: build_data_settings(data)?,
            cache: build_cache_settings(cache)?,
            validator: build_validator_settings(validator)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let candidate = format!("{host}:{port}");
    let addr = candidate
        .parse()
        .map_err(|err| LoadError::invalid("server.addr", format!("invalid address `{candidate}`: {err}")))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_data_settings(data: RawDataSettings) -> Result<DataSettings, LoadError> {
    let root = data.root.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("data.root", "path must not be empty"));
    }

    let snapshot_file = data
        .snapshot_file
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_FILE));
    if snapshot_file.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "data.snapshot_file",
            "path must not be empty",
        ));
    }

    Ok(DataSettings {
        root,
        snapshot_file,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let table_limit = non_zero_usize(
        cache.table_limit.unwrap_or(DEFAULT_TABLE_LIMIT),
        "cache.table_limit",
    )?;
    let default_page_limit = non_zero_usize(
        cache.default_page_limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        "cache.default_page_limit",
    )?;

    Ok(CacheSettings {
        table_limit,
        default_page_limit,
    })
}

fn build_validator_settings(
    validator: RawValidatorSettings,
) -> Result<ValidatorSettings, LoadError> {
    let command = validator
        .command
        .unwrap_or_else(|| DEFAULT_VALIDATOR_COMMAND.to_string());
    if command.trim().is_empty() {
        return Err(LoadError::invalid(
            "validator.command",
            "command must not be empty",
        ));
    }

    let slots = non_zero_usize(
        validator.slots.unwrap_or(DEFAULT_VALIDATOR_SLOTS),
        "validator.slots",
    )?;

    Ok(ValidatorSettings { command, slots })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDataSettings {
    root: Option<PathBuf>,
    snapshot_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    table_limit: Option<usize>,
    default_page_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawValidatorSettings {
    command: Option<String>,
    slots: Option<usize>,
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
