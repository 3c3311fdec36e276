//! Configuration layer: typed settings with layered precedence
//! (file → prefixed env → documented plain env aliases → CLI).
//!
//! The process environment is read exactly once, inside [`load`]. Every
//! component downstream receives the resolved [`Settings`] value by
//! reference; nothing else touches `std::env`.

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::logging::DEFAULT_SENSITIVE_FIELDS;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "keel";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_VAULT_MOUNT: &str = "secret";
const DEFAULT_VAULT_PATH: &str = "keel";
const DEFAULT_TOKEN_TTL_SECONDS: u64 = 3600;
const DEFAULT_EXCLUDE_PATHS: &[&str] = &["/healthz", "/readyz"];

/// Command-line arguments for the keel binary.
#[derive(Debug, Parser)]
#[command(name = "keel", version, about = "Keel service scaffold")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "KEEL_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
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

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Override the log output format (json|pretty).
    #[arg(long = "log-format", value_name = "FORMAT")]
    pub log_format: Option<String>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the cache connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and
/// validation. Read-only for the remainder of the process lifetime once the
/// startup loaders (see `assembly`) have run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub vault: VaultSettings,
    pub auth: AuthSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
    /// Field-name substrings redacted from logged payloads.
    pub sensitive_fields: Vec<String>,
    /// Path substrings exempt from request/response logging.
    pub exclude_paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format `{other}` (json|pretty)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub enabled: bool,
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub enabled: bool,
    pub addr: Option<String>,
    pub token: Option<String>,
    pub mount: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub token_secret: Option<String>,
    pub token_ttl_seconds: u64,
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

/// Load settings using the configured precedence
/// (file → `KEEL__` env → plain env aliases → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("KEEL").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_env_overrides(&EnvOverrides::capture());

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for
/// downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

/// The documented plain environment interface, captured in one place.
///
/// `USE_*` flags follow the boolean convention `"true"`/anything-else.
#[derive(Debug, Default, Clone)]
pub(crate) struct EnvOverrides {
    pub use_database: Option<bool>,
    pub use_redis: Option<bool>,
    pub use_vault: Option<bool>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub log_sensitive_fields: Option<String>,
    pub log_exclude_paths: Option<String>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub vault_addr: Option<String>,
    pub vault_token: Option<String>,
}

impl EnvOverrides {
    fn capture() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok()
        }
        fn flag(name: &str) -> Option<bool> {
            var(name).map(|value| value == "true")
        }

        Self {
            use_database: flag("USE_DATABASE"),
            use_redis: flag("USE_REDIS"),
            use_vault: flag("USE_VAULT"),
            log_level: var("LOG_LEVEL"),
            log_format: var("LOG_FORMAT"),
            log_sensitive_fields: var("LOG_SENSITIVE_FIELDS"),
            log_exclude_paths: var("LOG_EXCLUDE_PATHS"),
            database_url: var("DATABASE_URL"),
            redis_url: var("REDIS_URL"),
            vault_addr: var("VAULT_ADDR"),
            vault_token: var("VAULT_TOKEN"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    vault: RawVaultSettings,
    auth: RawAuthSettings,
}

impl RawSettings {
    fn apply_env_overrides(&mut self, env: &EnvOverrides) {
        if let Some(enabled) = env.use_database {
            self.database.enabled = Some(enabled);
        }
        if let Some(enabled) = env.use_redis {
            self.cache.enabled = Some(enabled);
        }
        if let Some(enabled) = env.use_vault {
            self.vault.enabled = Some(enabled);
        }
        if let Some(level) = env.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(format) = env.log_format.as_ref() {
            self.logging.format = Some(format.clone());
        }
        if let Some(fields) = env.log_sensitive_fields.as_ref() {
            self.logging.sensitive_fields = Some(split_csv(fields));
        }
        if let Some(paths) = env.log_exclude_paths.as_ref() {
            self.logging.exclude_paths = Some(split_csv(paths));
        }
        if let Some(url) = env.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(url) = env.redis_url.as_ref() {
            self.cache.url = Some(url.clone());
        }
        if let Some(addr) = env.vault_addr.as_ref() {
            self.vault.addr = Some(addr.clone());
        }
        if let Some(token) = env.vault_token.as_ref() {
            self.vault.token = Some(token.clone());
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(format) = overrides.log_format.as_ref() {
            self.logging.format = Some(format.clone());
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.cache.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            vault,
            auth,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache),
            vault: build_vault_settings(vault),
            auth: build_auth_settings(auth)?,
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
        .map_err(|err| LoadError::invalid("server.addr", format!("`{candidate}`: {err}")))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = match logging.format {
        Some(format) => LogFormat::from_str(format.as_str())
            .map_err(|reason| LoadError::invalid("logging.format", reason))?,
        None => LogFormat::Pretty,
    };

    let sensitive_fields = logging.sensitive_fields.unwrap_or_else(|| {
        DEFAULT_SENSITIVE_FIELDS
            .iter()
            .map(|field| field.to_string())
            .collect()
    });

    let exclude_paths = logging.exclude_paths.unwrap_or_else(|| {
        DEFAULT_EXCLUDE_PATHS
            .iter()
            .map(|path| path.to_string())
            .collect()
    });

    Ok(LoggingSettings {
        level,
        format,
        sensitive_fields,
        exclude_paths,
    })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_value = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = NonZeroU32::new(max_value).ok_or_else(|| {
        LoadError::invalid("database.max_connections", "must be greater than zero")
    })?;

    Ok(DatabaseSettings {
        enabled: database.enabled.unwrap_or(false),
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> CacheSettings {
    CacheSettings {
        enabled: cache.enabled.unwrap_or(false),
        url: cache.url,
    }
}

fn build_vault_settings(vault: RawVaultSettings) -> VaultSettings {
    VaultSettings {
        enabled: vault.enabled.unwrap_or(false),
        addr: vault.addr,
        token: vault.token,
        mount: vault.mount.unwrap_or_else(|| DEFAULT_VAULT_MOUNT.to_string()),
        path: vault.path.unwrap_or_else(|| DEFAULT_VAULT_PATH.to_string()),
    }
}

fn build_auth_settings(auth: RawAuthSettings) -> Result<AuthSettings, LoadError> {
    let token_ttl_seconds = auth.token_ttl_seconds.unwrap_or(DEFAULT_TOKEN_TTL_SECONDS);
    if token_ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "auth.token_ttl_seconds",
            "must be greater than zero",
        ));
    }

    Ok(AuthSettings {
        token_secret: auth.token_secret,
        token_ttl_seconds,
    })
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
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
    format: Option<String>,
    sensitive_fields: Option<Vec<String>>,
    exclude_paths: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    enabled: Option<bool>,
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawVaultSettings {
    enabled: Option<bool>,
    addr: Option<String>,
    token: Option<String>,
    mount: Option<String>,
    path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    token_secret: Option<String>,
    token_ttl_seconds: Option<u64>,
}
