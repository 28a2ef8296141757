//! Fail-open cache client.
//!
//! Wraps a `CacheStore` with a per-operation timeout and a JSON envelope.
//! Read paths swallow every store failure: the error is logged and counted and
//! the caller sees a miss. Invalidation paths get the error back so they can
//! report it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::store::{CacheStore, Pipeline, StoreError};

const METRIC_CACHE_HIT: &str = "atrium_cache_hit_total";
const METRIC_CACHE_MISS: &str = "atrium_cache_miss_total";
const METRIC_STORE_ERROR: &str = "atrium_cache_store_error_total";

/// Stored representation of a cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub ttl_seconds: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    enabled: bool,
    op_timeout: Duration,
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            enabled: config.enabled,
            op_timeout: config.op_timeout(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Read and decode a cached value. Any failure is reported as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        if !self.enabled {
            return None;
        }

        let rendered = key.render();
        let view = key.view();
        let raw = match self.guarded("get", self.store.get(&rendered)).await {
            Ok(raw) => raw,
            Err(_) => {
                counter!(METRIC_CACHE_MISS, "view" => view).increment(1);
                return None;
            }
        };

        let Some(raw) = raw else {
            counter!(METRIC_CACHE_MISS, "view" => view).increment(1);
            return None;
        };

        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) => {
                counter!(METRIC_CACHE_HIT, "view" => view).increment(1);
                debug!(target: "atrium::cache", key = %rendered, "cache hit");
                Some(entry)
            }
            Err(err) => {
                warn!(
                    target: "atrium::cache",
                    key = %rendered,
                    error = %err,
                    "discarding undecodable cache entry"
                );
                counter!(METRIC_CACHE_MISS, "view" => view).increment(1);
                None
            }
        }
    }

    /// Encode and store a value. Returns whether the write landed.
    pub async fn put_json<T: Serialize>(&self, key: &CacheKey, value: &T, ttl_secs: u64) -> bool {
        if !self.enabled {
            return false;
        }

        let rendered = key.render();
        let Some(payload) = encode_entry(&rendered, value, ttl_secs) else {
            return false;
        };

        self.guarded("set", self.store.set(&rendered, &payload, ttl_secs))
            .await
            .is_ok()
    }

    /// Encode several values and store them in one pipelined write.
    ///
    /// Returns how many entries landed: all of the encodable ones, or none
    /// when the pipeline fails.
    pub async fn put_many_json<T: Serialize>(
        &self,
        entries: &[(CacheKey, T)],
        ttl_secs: u64,
    ) -> usize {
        if !self.enabled || entries.is_empty() {
            return 0;
        }

        let pipeline = entries
            .iter()
            .filter_map(|(key, value)| {
                let rendered = key.render();
                encode_entry(&rendered, value, ttl_secs).map(|payload| (rendered, payload))
            })
            .fold(Pipeline::new(), |pipeline, (key, payload)| {
                pipeline.set(key, payload, ttl_secs)
            });
        if pipeline.is_empty() {
            return 0;
        }

        let written = pipeline.len();
        match self
            .guarded("exec_pipeline", self.store.exec_pipeline(pipeline))
            .await
        {
            Ok(()) => written,
            Err(_) => 0,
        }
    }

    /// Remaining TTL of a key, `None` on miss or store failure.
    pub async fn ttl(&self, key: &CacheKey) -> Option<u64> {
        if !self.enabled {
            return None;
        }
        let rendered = key.render();
        self.guarded("ttl", self.store.ttl(&rendered))
            .await
            .ok()
            .flatten()
    }

    pub async fn delete_keys(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.guarded("del", self.store.del(keys)).await
    }

    pub async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        self.guarded("delete_matching", self.store.delete_matching(pattern))
            .await
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.guarded("ping", self.store.ping()).await
    }

    /// Bound a store call by the configured timeout, logging and counting failures.
    async fn guarded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let result = match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                op,
                timeout_ms: self.op_timeout.as_millis() as u64,
            }),
        };

        if let Err(err) = &result {
            counter!(METRIC_STORE_ERROR, "op" => op).increment(1);
            warn!(
                target: "atrium::cache",
                op,
                backend = self.store.backend(),
                error = %err,
                "cache store operation failed; continuing without cache"
            );
        }
        result
    }
}

fn encode_entry<T: Serialize>(key: &str, value: &T, ttl_secs: u64) -> Option<String> {
    let entry = CacheEntry {
        key: key.to_string(),
        value,
        ttl_seconds: ttl_secs,
        created_at: OffsetDateTime::now_utc(),
    };
    serde_json::to_string(&entry)
        .map_err(|err| {
            warn!(
                target: "atrium::cache",
                key,
                error = %err,
                "failed to encode cache entry"
            );
        })
        .ok()
}
