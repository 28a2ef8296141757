//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;
use uuid::Uuid;

use crate::cache::CacheBackend;

pub use cli::{
    CacheBackendArg, CacheOverrides, CliArgs, Command, DatabaseOverride, InvalidateArgs,
    ServeArgs, ServeOverrides, WarmArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "atrium";
const ENV_PREFIX: &str = "ATRIUM";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 16;
const DEFAULT_DB_ACQUIRE_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_CACHE_MEMORY_CAPACITY: u64 = 10_000;
const DEFAULT_CACHE_PUBLIC_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_USER_TTL_SECS: u64 = 30;
const DEFAULT_CACHE_STATS_TTL_SECS: u64 = 60;
const DEFAULT_CACHE_OP_TIMEOUT_MS: u64 = 250;
const DEFAULT_CACHE_WARM_INTERVAL_SECS: u64 = 240;
const DEFAULT_CACHE_WARM_DETAIL_LIMIT: usize = 20;
const DEFAULT_BROADCAST_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub broadcast: BroadcastSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
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
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub backend: CacheBackend,
    pub redis_url: Option<Url>,
    pub memory_capacity: NonZeroUsize,
    pub public_ttl_secs: NonZeroU64,
    pub user_ttl_secs: NonZeroU64,
    pub stats_ttl_secs: NonZeroU64,
    pub op_timeout_ms: NonZeroU64,
    pub warm_on_start: bool,
    /// Zero disables periodic warming.
    pub warm_interval_secs: u64,
    pub warm_detail_limit: usize,
}

#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    pub peers: Vec<Url>,
    pub secret: Option<String>,
    pub timeout: Duration,
    pub instance_id: String,
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

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("broadcast.peers")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Warm(args)) => {
            raw.apply_database_override(&args.database);
            raw.apply_cache_overrides(&args.cache);
        }
        Some(Command::Invalidate(args)) => {
            raw.apply_database_override(&args.database);
            raw.apply_cache_overrides(&args.cache);
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    broadcast: RawBroadcastSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(warm) = overrides.warm_on_start {
            self.cache.warm_on_start = Some(warm);
        }
        if let Some(interval) = overrides.warm_interval_seconds {
            self.cache.warm_interval_secs = Some(interval);
        }
        if let Some(id) = overrides.broadcast_instance_id.as_ref() {
            self.broadcast.instance_id = Some(id.clone());
        }

        self.apply_database_override(&overrides.database);
        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(backend) = overrides.backend {
            self.cache.backend = Some(backend.as_str().to_string());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(enabled) = overrides.enabled {
            self.cache.enabled = Some(enabled);
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
            broadcast,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            broadcast: build_broadcast_settings(broadcast)?,
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

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;
    let acquire_timeout_ms = non_zero_u64(
        database
            .acquire_timeout_ms
            .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_MS),
        "database.acquire_timeout_ms",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        acquire_timeout: Duration::from_millis(acquire_timeout_ms.get()),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match non_blank(cache.backend) {
        None => CacheBackend::default(),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "memory" => CacheBackend::Memory,
            "redis" => CacheBackend::Redis,
            other => {
                return Err(LoadError::invalid(
                    "cache.backend",
                    format!("unknown backend `{other}` (expected memory or redis)"),
                ));
            }
        },
    };

    let redis_url = non_blank(cache.redis_url)
        .map(|value| {
            Url::parse(&value)
                .map_err(|err| LoadError::invalid("cache.redis_url", format!("{err}")))
        })
        .transpose()?;
    if backend == CacheBackend::Redis && redis_url.is_none() {
        return Err(LoadError::invalid(
            "cache.redis_url",
            "required when cache.backend is redis",
        ));
    }

    let capacity = cache
        .memory_capacity
        .unwrap_or(DEFAULT_CACHE_MEMORY_CAPACITY);
    let memory_capacity = usize::try_from(capacity)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid("cache.memory_capacity", "must be a positive integer")
        })?;

    let warm_detail_limit = cache
        .warm_detail_limit
        .map(usize::try_from)
        .transpose()
        .map_err(|_| {
            LoadError::invalid(
                "cache.warm_detail_limit",
                "value exceeds supported range for usize",
            )
        })?
        .unwrap_or(DEFAULT_CACHE_WARM_DETAIL_LIMIT);

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        backend,
        redis_url,
        memory_capacity,
        public_ttl_secs: non_zero_u64(
            cache.public_ttl_secs.unwrap_or(DEFAULT_CACHE_PUBLIC_TTL_SECS),
            "cache.public_ttl_secs",
        )?,
        user_ttl_secs: non_zero_u64(
            cache.user_ttl_secs.unwrap_or(DEFAULT_CACHE_USER_TTL_SECS),
            "cache.user_ttl_secs",
        )?,
        stats_ttl_secs: non_zero_u64(
            cache.stats_ttl_secs.unwrap_or(DEFAULT_CACHE_STATS_TTL_SECS),
            "cache.stats_ttl_secs",
        )?,
        op_timeout_ms: non_zero_u64(
            cache.op_timeout_ms.unwrap_or(DEFAULT_CACHE_OP_TIMEOUT_MS),
            "cache.op_timeout_ms",
        )?,
        warm_on_start: cache.warm_on_start.unwrap_or(true),
        warm_interval_secs: cache
            .warm_interval_secs
            .unwrap_or(DEFAULT_CACHE_WARM_INTERVAL_SECS),
        warm_detail_limit,
    })
}

fn build_broadcast_settings(
    broadcast: RawBroadcastSettings,
) -> Result<BroadcastSettings, LoadError> {
    let mut peers = Vec::with_capacity(broadcast.peers.len());
    for peer in broadcast.peers {
        let trimmed = peer.trim();
        if trimmed.is_empty() {
            continue;
        }
        let url = Url::parse(trimmed).map_err(|err| {
            LoadError::invalid("broadcast.peers", format!("invalid peer `{trimmed}`: {err}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(LoadError::invalid(
                "broadcast.peers",
                format!("peer `{trimmed}` must use http or https"),
            ));
        }
        peers.push(url);
    }

    let timeout_ms = non_zero_u64(
        broadcast.timeout_ms.unwrap_or(DEFAULT_BROADCAST_TIMEOUT_MS),
        "broadcast.timeout_ms",
    )?;

    let instance_id =
        non_blank(broadcast.instance_id).unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok(BroadcastSettings {
        peers,
        secret: non_blank(broadcast.secret),
        timeout: Duration::from_millis(timeout_ms.get()),
        instance_id,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    backend: Option<String>,
    redis_url: Option<String>,
    memory_capacity: Option<u64>,
    public_ttl_secs: Option<u64>,
    user_ttl_secs: Option<u64>,
    stats_ttl_secs: Option<u64>,
    op_timeout_ms: Option<u64>,
    warm_on_start: Option<bool>,
    warm_interval_secs: Option<u64>,
    warm_detail_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBroadcastSettings {
    peers: Vec<String>,
    secret: Option<String>,
    timeout_ms: Option<u64>,
    instance_id: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
