//! Cache configuration.
//!
//! Runtime view of the `[cache]` settings section: which backend stores the
//! snapshots, how long each class of snapshot lives, and how the warmer runs.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_MEMORY_CAPACITY: usize = 10_000;
const DEFAULT_PUBLIC_TTL_SECS: u64 = 300;
const DEFAULT_USER_TTL_SECS: u64 = 30;
const DEFAULT_STATS_TTL_SECS: u64 = 60;
const DEFAULT_OP_TIMEOUT_MS: u64 = 250;
const DEFAULT_WARM_INTERVAL_SECS: u64 = 240;
const DEFAULT_WARM_DETAIL_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

impl CacheBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheBackend::Memory => "memory",
            CacheBackend::Redis => "redis",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When false every loader bypasses the store entirely.
    pub enabled: bool,
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
    /// Maximum entries held by the in-process store.
    pub memory_capacity: usize,
    /// TTL for anonymous course list and course detail snapshots.
    pub public_ttl_secs: u64,
    /// TTL for per-user snapshots (navbar, personalised list and detail).
    pub user_ttl_secs: u64,
    pub stats_ttl_secs: u64,
    /// Upper bound on any single store operation.
    pub op_timeout_ms: u64,
    pub warm_on_start: bool,
    /// Zero disables periodic warming.
    pub warm_interval_secs: u64,
    pub warm_detail_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::Memory,
            redis_url: None,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            public_ttl_secs: DEFAULT_PUBLIC_TTL_SECS,
            user_ttl_secs: DEFAULT_USER_TTL_SECS,
            stats_ttl_secs: DEFAULT_STATS_TTL_SECS,
            op_timeout_ms: DEFAULT_OP_TIMEOUT_MS,
            warm_on_start: true,
            warm_interval_secs: DEFAULT_WARM_INTERVAL_SECS,
            warm_detail_limit: DEFAULT_WARM_DETAIL_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            backend: settings.backend,
            redis_url: settings.redis_url.as_ref().map(|url| url.to_string()),
            memory_capacity: settings.memory_capacity.get(),
            public_ttl_secs: settings.public_ttl_secs.get(),
            user_ttl_secs: settings.user_ttl_secs.get(),
            stats_ttl_secs: settings.stats_ttl_secs.get(),
            op_timeout_ms: settings.op_timeout_ms.get(),
            warm_on_start: settings.warm_on_start,
            warm_interval_secs: settings.warm_interval_secs,
            warm_detail_limit: settings.warm_detail_limit,
        }
    }
}

impl CacheConfig {
    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms.max(1))
    }

    /// Period of the background warm loop, `None` when disabled.
    pub fn warm_interval(&self) -> Option<Duration> {
        (self.warm_interval_secs > 0).then(|| Duration::from_secs(self.warm_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.backend, CacheBackend::Memory);
        assert_eq!(config.public_ttl_secs, 300);
        assert_eq!(config.user_ttl_secs, 30);
        assert_eq!(config.stats_ttl_secs, 60);
        assert_eq!(config.op_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn zero_capacity_clamps_to_one() {
        let config = CacheConfig {
            memory_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.memory_capacity_non_zero().get(), 1);
    }

    #[test]
    fn zero_interval_disables_periodic_warm() {
        let config = CacheConfig {
            warm_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.warm_interval().is_none());
        assert_eq!(
            CacheConfig::default().warm_interval(),
            Some(Duration::from_secs(240))
        );
    }
}
