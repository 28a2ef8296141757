//! Background cache warming.
//!
//! The warmer builds snapshots with the same assembly code a request uses, so
//! a warmed entry is what a cold request would have stored. The course list
//! goes through the regular cache-aside path; the details it leads to are
//! rebuilt and written back in one pipelined batch. The warmer runs once at
//! start and then on a fixed period, owned by a process-wide handle that is
//! installed once and shut down explicitly.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use metrics::histogram;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::loaders::{LoadOutcome, LoaderError, SnapshotLoader};
use crate::cache::{Audience, CacheKey, mutex_lock};

const METRIC_CACHE_WARM_MS: &str = "atrium_warm_ms";

static GLOBAL_WARMER: OnceCell<Mutex<Option<WarmerHandle>>> = OnceCell::new();

#[derive(Debug, Error)]
pub enum CacheWarmError {
    #[error("failed to warm `{key}`")]
    Load {
        key: String,
        #[source]
        source: LoaderError,
    },
    #[error("cache warmer already installed")]
    AlreadyInstalled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmSummary {
    pub warmed: usize,
    /// Keys another warm pass was already working on.
    pub skipped: usize,
    pub failed: usize,
}

impl WarmSummary {
    fn record<T>(&mut self, result: &Result<Option<T>, CacheWarmError>) {
        match result {
            Ok(Some(_)) => self.warmed += 1,
            Ok(None) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Exclusive right to warm one key; released on drop.
pub struct WarmClaim {
    key: String,
    in_flight: Arc<DashMap<String, ()>>,
}

impl Drop for WarmClaim {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

pub struct CacheWarmer {
    loader: SnapshotLoader,
    detail_limit: usize,
    in_flight: Arc<DashMap<String, ()>>,
}

impl CacheWarmer {
    pub fn new(loader: SnapshotLoader, detail_limit: usize) -> Self {
        Self {
            loader,
            detail_limit,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Claim a key for warming, or `None` when a warm of it is already running.
    pub fn try_claim(&self, key: &CacheKey) -> Option<WarmClaim> {
        let rendered = key.render();
        match self.in_flight.entry(rendered.clone()) {
            dashmap::Entry::Occupied(_) => None,
            dashmap::Entry::Vacant(slot) => {
                slot.insert(());
                Some(WarmClaim {
                    key: rendered,
                    in_flight: Arc::clone(&self.in_flight),
                })
            }
        }
    }

    /// Warm the anonymous course list and the details of its first courses.
    ///
    /// Failures are logged and counted, never returned.
    pub async fn warm_once(&self) -> WarmSummary {
        let started = Instant::now();
        let mut summary = WarmSummary::default();

        let list = self
            .warm_key(CacheKey::course_list(Audience::Anonymous), || {
                self.loader.course_list(None)
            })
            .await;
        summary.record(&list);

        let course_ids: Vec<Uuid> = match list {
            Ok(Some(outcome)) => outcome
                .snapshot
                .courses
                .iter()
                .take(self.detail_limit)
                .map(|course| course.id)
                .collect(),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(target: "atrium::warmer", error = %err, "course list warm failed");
                Vec::new()
            }
        };

        let (written, failed, skipped) = self.warm_details(course_ids).await;
        summary.warmed += written;
        summary.failed += failed;
        summary.skipped += skipped;

        histogram!(METRIC_CACHE_WARM_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            target: "atrium::warmer",
            warmed = summary.warmed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Cache warm pass complete"
        );
        summary
    }

    /// Rebuild anonymous course details and store them in one pipeline.
    ///
    /// Returns `(written, failed, skipped)`.
    async fn warm_details(&self, course_ids: Vec<Uuid>) -> (usize, usize, usize) {
        let requested = course_ids.len();
        let claimed: Vec<(Uuid, CacheKey, WarmClaim)> = course_ids
            .into_iter()
            .filter_map(|course_id| {
                let key = CacheKey::course_detail(course_id, Audience::Anonymous);
                self.try_claim(&key).map(|claim| (course_id, key, claim))
            })
            .collect();
        let skipped = requested - claimed.len();

        let built = join_all(
            claimed
                .iter()
                .map(|(course_id, _, _)| self.loader.assemble_public_course_detail(*course_id)),
        )
        .await;

        let mut failed = 0;
        let mut entries = Vec::with_capacity(built.len());
        for ((_, key, _), result) in claimed.iter().zip(built) {
            match result {
                Ok(snapshot) => entries.push((key.clone(), snapshot)),
                Err(err) => {
                    failed += 1;
                    warn!(target: "atrium::warmer", key = %key, error = %err, "course detail warm failed");
                }
            }
        }

        let ttl = self.loader.ttls().public_secs;
        let written = self.loader.cache().put_many_json(&entries, ttl).await;
        failed += entries.len() - written;
        (written, failed, skipped)
    }

    async fn warm_key<T, F, Fut>(
        &self,
        key: CacheKey,
        load: F,
    ) -> Result<Option<LoadOutcome<T>>, CacheWarmError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LoadOutcome<T>, LoaderError>>,
    {
        let Some(_claim) = self.try_claim(&key) else {
            return Ok(None);
        };

        load().await.map(Some).map_err(|source| CacheWarmError::Load {
            key: key.render(),
            source,
        })
    }

    /// Start the background loop: one pass at start (when enabled), then one
    /// per `interval`.
    pub fn spawn(
        self: Arc<Self>,
        warm_on_start: bool,
        interval: Option<Duration>,
    ) -> WarmerHandle {
        let (shutdown, mut signal) = watch::channel(false);

        let task = tokio::spawn(async move {
            if warm_on_start {
                tokio::select! {
                    _ = self.warm_once() => {}
                    _ = signal.changed() => return,
                }
            }

            let Some(period) = interval else {
                return;
            };
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // first tick completes immediately

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.warm_once().await;
                    }
                    _ = signal.changed() => break,
                }
            }
        });

        WarmerHandle { shutdown, task }
    }
}

/// Owner of the running warm loop.
pub struct WarmerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WarmerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(target: "atrium::warmer", error = %err, "cache warmer task ended abnormally");
        }
    }
}

/// Install the process-wide warmer. Fails if one was installed before.
pub fn install_global(handle: WarmerHandle) -> Result<(), CacheWarmError> {
    GLOBAL_WARMER
        .set(Mutex::new(Some(handle)))
        .map_err(|_| CacheWarmError::AlreadyInstalled)
}

/// Stop the process-wide warmer, if any. Later calls are no-ops.
pub async fn shutdown_global() {
    let handle = GLOBAL_WARMER
        .get()
        .and_then(|slot| mutex_lock(slot, "atrium::warmer", "shutdown_global").take());
    if let Some(handle) = handle {
        handle.shutdown().await;
        info!(target: "atrium::warmer", "Cache warmer stopped");
    }
}
