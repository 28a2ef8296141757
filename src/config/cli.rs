use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, builder::BoolishValueParser};
use uuid::Uuid;

use crate::cache::{InvalidationScope, ResourceType};

/// Command-line arguments for the Atrium binary.
#[derive(Debug, Parser)]
#[command(name = "atrium", version, about = "Atrium read-aggregation service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "ATRIUM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service (default).
    Serve(Box<ServeArgs>),
    /// Warm the hot cache keys once and exit.
    Warm(WarmArgs),
    /// Invalidate the cache keys affected by a resource change.
    Invalidate(InvalidateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the cache backend.
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub backend: Option<CacheBackendArg>,

    /// Override the Redis connection URL.
    #[arg(long = "cache-redis-url", value_name = "URL")]
    pub redis_url: Option<String>,

    /// Toggle the snapshot cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackendArg {
    Memory,
    Redis,
}

impl CacheBackendArg {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheBackendArg::Memory => "memory",
            CacheBackendArg::Redis => "redis",
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

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

    /// Override whether hot keys are warmed at start.
    #[arg(
        long = "cache-warm-on-start",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub warm_on_start: Option<bool>,

    /// Override the warm period; 0 disables periodic warming.
    #[arg(long = "cache-warm-interval-seconds", value_name = "SECONDS")]
    pub warm_interval_seconds: Option<u64>,

    /// Override this instance's broadcast identity.
    #[arg(long = "broadcast-instance-id", value_name = "ID")]
    pub broadcast_instance_id: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WarmArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub cache: CacheOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Kind of resource that changed.
    #[arg(value_name = "RESOURCE", value_parser = parse_resource)]
    pub resource: ResourceType,

    /// Id of the changed resource.
    #[arg(long = "id", value_name = "UUID")]
    pub id: Option<Uuid>,

    /// User whose personalised keys should also be dropped.
    #[arg(long = "user", value_name = "UUID")]
    pub user: Option<Uuid>,

    /// Audience scope of the invalidation.
    #[arg(long = "scope", value_name = "SCOPE", default_value = "all", value_parser = parse_scope)]
    pub scope: InvalidationScope,
}

fn parse_resource(value: &str) -> Result<ResourceType, String> {
    value.trim().to_ascii_lowercase().parse()
}

fn parse_scope(value: &str) -> Result<InvalidationScope, String> {
    value.trim().to_ascii_lowercase().parse()
}
