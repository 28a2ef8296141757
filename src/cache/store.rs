//! Cache store adapter.
//!
//! `CacheStore` is the narrow key-value contract every backend implements:
//! string values, second-granularity TTLs, glob key enumeration and batched
//! writes. `MemoryStore` is the in-process backend; the Redis backend lives in
//! `infra::redis`.

use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;
use tokio::time::{Duration, Instant};

use super::config::CacheConfig;
use super::glob::glob_match;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache command `{command}` failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },
    #[error("cache operation `{op}` timed out after {timeout_ms}ms")]
    Timeout { op: &'static str, timeout_ms: u64 },
}

impl StoreError {
    pub fn command(command: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Command {
            command,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOp {
    Set {
        key: String,
        value: String,
        ttl_secs: u64,
    },
    Del {
        keys: Vec<String>,
    },
}

/// Batched writes applied as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    ops: Vec<PipelineOp>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>, ttl_secs: u64) -> Self {
        self.ops.push(PipelineOp::Set {
            key: key.into(),
            value: value.into(),
            ttl_secs,
        });
        self
    }

    pub fn del(mut self, keys: Vec<String>) -> Self {
        if !keys.is_empty() {
            self.ops.push(PipelineOp::Del { keys });
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[PipelineOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<PipelineOp> {
        self.ops
    }
}

/// Key-value store holding serialized snapshots.
///
/// A `ttl_secs` of zero stores the value without expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Backend name used in logs and health output.
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Remaining lifetime in seconds; `None` when the key is missing or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Keys matching a Redis glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn exec_pipeline(&self, pipeline: Pipeline) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Delete every key matching `pattern`, returning how many were removed.
    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        let keys = self.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.del(&keys).await
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn new(value: String, ttl_secs: u64, now: Instant) -> Self {
        Self {
            value,
            expires_at: (ttl_secs > 0).then(|| now + Duration::from_secs(ttl_secs)),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process LRU store with lazy TTL expiry.
///
/// Expired entries are dropped when touched and are never returned by
/// `get`, `exists` or `keys`.
pub struct MemoryStore {
    entries: Mutex<LruCache<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.memory_capacity_non_zero())),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(&CacheConfig {
            memory_capacity: capacity,
            ..CacheConfig::default()
        })
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        mutex_lock(&self.entries, SOURCE, "len")
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_entry<'a>(
        entries: &'a mut LruCache<String, MemoryEntry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a MemoryEntry> {
        let expired = entries.peek(key)?.is_expired(now);
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        Ok(Self::live_entry(&mut entries, key, Instant::now()).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let entry = MemoryEntry::new(value.to_string(), ttl_secs, Instant::now());
        mutex_lock(&self.entries, SOURCE, "set").put(key.to_string(), entry);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "del");
        let removed = keys
            .iter()
            .filter_map(|key| entries.pop(key.as_str()))
            .filter(|entry| !entry.is_expired(now))
            .count();
        Ok(removed as u64)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "ttl");
        let remaining = Self::live_entry(&mut entries, key, now)
            .and_then(|entry| entry.expires_at)
            .map(|deadline| {
                let millis = deadline.saturating_duration_since(now).as_millis() as u64;
                millis.div_ceil(1000)
            });
        Ok(remaining)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "exists");
        Ok(Self::live_entry(&mut entries, key, Instant::now()).is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "keys");

        let mut expired = Vec::new();
        let mut matched = Vec::new();
        for (key, entry) in entries.iter() {
            if entry.is_expired(now) {
                expired.push(key.clone());
            } else if glob_match(pattern, key) {
                matched.push(key.clone());
            }
        }
        for key in expired {
            entries.pop(&key);
        }

        matched.sort();
        Ok(matched)
    }

    async fn exec_pipeline(&self, pipeline: Pipeline) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "exec_pipeline");
        for op in pipeline.into_ops() {
            match op {
                PipelineOp::Set {
                    key,
                    value,
                    ttl_secs,
                } => {
                    entries.put(key, MemoryEntry::new(value, ttl_secs, now));
                }
                PipelineOp::Del { keys } => {
                    for key in keys {
                        entries.pop(&key);
                    }
                }
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
