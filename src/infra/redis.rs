//! Redis-backed cache store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::cache::{CacheStore, Pipeline, PipelineOp, StoreError};

/// Keys requested per `SCAN` iteration.
const SCAN_COUNT: u32 = 200;
/// Keys per `DEL` command.
const DEL_CHUNK: usize = 500;

/// Store backed by a multiplexed, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|err| StoreError::Unavailable(err.to_string()))?;

        let conn = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Timeout {
                op: "connect",
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;

        info!(target: "atrium::cache", backend = "redis", "Connected to cache store");
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(|err| StoreError::command("GET", err))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if ttl_secs > 0 {
            cmd.arg("EX").arg(ttl_secs);
        }
        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(|err| StoreError::command("SET", err))
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let mut removed = 0;
        for chunk in keys.chunks(DEL_CHUNK) {
            removed += redis::cmd("DEL")
                .arg(chunk)
                .query_async::<u64>(&mut conn)
                .await
                .map_err(|err| StoreError::command("DEL", err))?;
        }
        Ok(removed)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn();
        // -2: missing, -1: no expiry.
        let ttl = redis::cmd("TTL")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|err| StoreError::command("TTL", err))?;
        Ok(u64::try_from(ttl).ok())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let count = redis::cmd("EXISTS")
            .arg(key)
            .query_async::<u64>(&mut conn)
            .await
            .map_err(|err| StoreError::command("EXISTS", err))?;
        Ok(count > 0)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async::<(u64, Vec<String>)>(&mut conn)
                .await
                .map_err(|err| StoreError::command("SCAN", err))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may report a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn exec_pipeline(&self, pipeline: Pipeline) -> Result<(), StoreError> {
        if pipeline.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in pipeline.into_ops() {
            match op {
                PipelineOp::Set {
                    key,
                    value,
                    ttl_secs,
                } => {
                    let cmd = pipe.cmd("SET").arg(key).arg(value);
                    if ttl_secs > 0 {
                        cmd.arg("EX").arg(ttl_secs);
                    }
                    cmd.ignore();
                }
                PipelineOp::Del { keys } => {
                    pipe.cmd("DEL").arg(keys).ignore();
                }
            }
        }

        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|err| StoreError::command("MULTI", err))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|err| StoreError::command("PING", err))
    }
}
