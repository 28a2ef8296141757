//! Per-page atomic loaders.
//!
//! Each loader assembles one consistent snapshot per request: a cache lookup
//! first, then on a miss the minimum set of authoritative reads (independent
//! reads run concurrently, related rows are fetched in bulk and joined in
//! memory) and a cache populate with a TTL matching the view's volatility.

mod checkout;
mod course_detail;
mod course_list;
mod course_stats;
mod navbar;
mod user_enrollments;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::application::repos::{
    CoursesRepo, EnrollmentsRepo, RepoError, ReviewsRepo, UsersRepo,
};
use crate::application::snapshots::Snapshot;
use crate::cache::{CacheClient, CacheConfig, CacheKey};
use crate::domain::error::DomainError;

const METRIC_LOADER_MS: &str = "atrium_loader_ms";

/// Maximum reviews embedded in a course detail snapshot.
pub const DETAIL_REVIEW_LIMIT: u32 = 20;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("authentication required")]
    Unauthorized,
    #[error("authoritative read failed")]
    Transient(#[source] RepoError),
    #[error("inconsistent aggregation")]
    Inconsistent(#[source] DomainError),
}

impl LoaderError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LoaderError::Transient(_))
    }
}

impl From<RepoError> for LoaderError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => LoaderError::not_found("resource"),
            other => LoaderError::Transient(other),
        }
    }
}

impl From<DomainError> for LoaderError {
    fn from(err: DomainError) -> Self {
        LoaderError::Inconsistent(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// The view is never cached or the cache is disabled.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Bypass => "bypass",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOutcome<T> {
    pub snapshot: T,
    pub cache: CacheStatus,
    /// Lifetime of the cached snapshot; `None` when it is not cached.
    pub ttl: Option<u64>,
    /// Same snapshot for every visitor, so downstream caches may share it.
    pub shared: bool,
    pub load_time: Duration,
}

impl<T> LoadOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> LoadOutcome<U> {
        LoadOutcome {
            snapshot: f(self.snapshot),
            cache: self.cache,
            ttl: self.ttl,
            shared: self.shared,
            load_time: self.load_time,
        }
    }
}

/// View selector for the generic entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewRequest {
    Navbar,
    CourseList,
    CourseDetail { course_id: Uuid },
    CourseStats { course_id: Uuid },
    UserEnrollments,
    Checkout { course_id: Uuid },
}

impl ViewRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ViewRequest::Navbar => "navbar",
            ViewRequest::CourseList => "course_list",
            ViewRequest::CourseDetail { .. } => "course_detail",
            ViewRequest::CourseStats { .. } => "course_stats",
            ViewRequest::UserEnrollments => "user_enrollments",
            ViewRequest::Checkout { .. } => "checkout",
        }
    }
}

/// TTLs by snapshot volatility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotTtls {
    pub public_secs: u64,
    pub user_secs: u64,
    pub stats_secs: u64,
}

impl From<&CacheConfig> for SnapshotTtls {
    fn from(config: &CacheConfig) -> Self {
        Self {
            public_secs: config.public_ttl_secs,
            user_secs: config.user_ttl_secs,
            stats_secs: config.stats_ttl_secs,
        }
    }
}

impl SnapshotTtls {
    pub fn for_audience(&self, user: Option<Uuid>) -> u64 {
        match user {
            Some(_) => self.user_secs,
            None => self.public_secs,
        }
    }
}

#[derive(Clone)]
pub struct LoaderRepos {
    pub users: Arc<dyn UsersRepo>,
    pub courses: Arc<dyn CoursesRepo>,
    pub enrollments: Arc<dyn EnrollmentsRepo>,
    pub reviews: Arc<dyn ReviewsRepo>,
}

#[derive(Clone)]
pub struct SnapshotLoader {
    repos: LoaderRepos,
    cache: Arc<CacheClient>,
    ttls: SnapshotTtls,
}

impl SnapshotLoader {
    pub fn new(repos: LoaderRepos, cache: Arc<CacheClient>, ttls: SnapshotTtls) -> Self {
        Self { repos, cache, ttls }
    }

    pub fn ttls(&self) -> SnapshotTtls {
        self.ttls
    }

    pub fn cache(&self) -> &Arc<CacheClient> {
        &self.cache
    }

    /// Load any view for the (optional) requesting user.
    #[instrument(skip(self), fields(view = view.name()))]
    pub async fn load(
        &self,
        view: ViewRequest,
        user: Option<Uuid>,
    ) -> Result<LoadOutcome<Snapshot>, LoaderError> {
        match view {
            ViewRequest::Navbar => Ok(self.navbar(user).await?.map(Snapshot::Navbar)),
            ViewRequest::CourseList => Ok(self.course_list(user).await?.map(Snapshot::CourseList)),
            ViewRequest::CourseDetail { course_id } => Ok(self
                .course_detail(course_id, user)
                .await?
                .map(Snapshot::CourseDetail)),
            ViewRequest::CourseStats { course_id } => Ok(self
                .course_stats(course_id)
                .await?
                .map(Snapshot::CourseStats)),
            ViewRequest::UserEnrollments => Ok(self
                .user_enrollments(user)
                .await?
                .map(Snapshot::UserEnrollments)),
            ViewRequest::Checkout { course_id } => {
                Ok(self.checkout(course_id, user).await?.map(Snapshot::Checkout))
            }
        }
    }

    /// Cache-aside core shared by every cacheable view.
    ///
    /// `key = None` skips the store (uncacheable view). Store failures surface
    /// as misses inside `CacheClient`; only `build` errors propagate.
    async fn cached<T, F, Fut>(
        &self,
        view: &'static str,
        key: Option<CacheKey>,
        ttl_secs: u64,
        build: F,
    ) -> Result<LoadOutcome<T>, LoaderError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LoaderError>>,
    {
        let started = Instant::now();
        let shared = key.as_ref().is_some_and(CacheKey::is_shared);
        let key = key.filter(|_| self.cache.is_enabled());

        let outcome = match key {
            None => {
                let snapshot = build().await;
                snapshot.map(|snapshot| LoadOutcome {
                    snapshot,
                    cache: CacheStatus::Bypass,
                    ttl: None,
                    shared,
                    load_time: started.elapsed(),
                })
            }
            Some(key) => match self.cache.get_json::<T>(&key).await {
                Some(entry) => Ok(LoadOutcome {
                    snapshot: entry.value,
                    cache: CacheStatus::Hit,
                    ttl: Some(ttl_secs),
                    shared,
                    load_time: started.elapsed(),
                }),
                None => match build().await {
                    Ok(snapshot) => {
                        self.cache.put_json(&key, &snapshot, ttl_secs).await;
                        Ok(LoadOutcome {
                            snapshot,
                            cache: CacheStatus::Miss,
                            ttl: Some(ttl_secs),
                            shared,
                            load_time: started.elapsed(),
                        })
                    }
                    Err(err) => Err(err),
                },
            },
        };

        histogram!(METRIC_LOADER_MS, "view" => view)
            .record(started.elapsed().as_secs_f64() * 1000.0);

        if let Err(LoaderError::Inconsistent(err)) = &outcome {
            error!(target: "atrium::loader", view, error = %err, "snapshot failed reference check");
        }
        outcome
    }
}

/// Sorted, de-duplicated ids for bulk reads.
fn unique_ids(ids: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_not_found_maps_to_not_found() {
        assert!(matches!(
            LoaderError::from(RepoError::NotFound),
            LoaderError::NotFound { .. }
        ));
        let timeout = LoaderError::from(RepoError::Timeout);
        assert!(timeout.is_retryable());
    }

    #[test]
    fn ttl_depends_on_audience() {
        let ttls = SnapshotTtls::from(&CacheConfig::default());
        assert_eq!(ttls.for_audience(None), 300);
        assert_eq!(ttls.for_audience(Some(Uuid::from_u128(1))), 30);
    }

    #[test]
    fn unique_ids_sorts_and_dedups() {
        let a = Uuid::from_u128(2);
        let b = Uuid::from_u128(1);
        assert_eq!(unique_ids([a, b, a]), vec![b, a]);
    }
}
