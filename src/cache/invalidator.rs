//! Synchronous invalidation executor.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::broadcast::Broadcaster;
use super::client::CacheClient;
use super::events::InvalidationRequest;
use super::planner::InvalidationPlan;

const METRIC_INVALIDATE_MS: &str = "atrium_invalidate_ms";
const METRIC_INVALIDATE_DELETED: &str = "atrium_invalidate_deleted_total";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationReport {
    /// Keys that existed and were removed.
    pub deleted: u64,
    /// Patterns (or the exact-key batch) whose deletion failed.
    pub failed_patterns: Vec<String>,
}

impl InvalidationReport {
    pub fn is_complete(&self) -> bool {
        self.failed_patterns.is_empty()
    }
}

/// Deletes every snapshot a mutation may have made stale, then notifies peers.
///
/// Store failures never propagate: they are logged and listed in the report and
/// the affected snapshots age out by TTL.
#[derive(Clone)]
pub struct Invalidator {
    cache: Arc<CacheClient>,
    broadcaster: Option<Arc<Broadcaster>>,
}

impl Invalidator {
    pub fn new(cache: Arc<CacheClient>) -> Self {
        Self {
            cache,
            broadcaster: None,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn broadcaster(&self) -> Option<&Arc<Broadcaster>> {
        self.broadcaster.as_ref()
    }

    #[instrument(
        skip(self, request),
        fields(
            resource = %request.resource_type,
            resource_id = ?request.resource_id,
            scope = request.scope.as_str(),
            origin = ?request.origin,
        )
    )]
    pub async fn invalidate(&self, request: InvalidationRequest) -> InvalidationReport {
        let started = Instant::now();
        let plan = InvalidationPlan::for_request(&request);
        let mut report = InvalidationReport::default();

        if self.cache.is_enabled() && !plan.is_empty() {
            self.execute(&plan, &mut report).await;
        }

        histogram!(METRIC_INVALIDATE_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        counter!(METRIC_INVALIDATE_DELETED).increment(report.deleted);

        info!(
            target: "atrium::invalidator",
            %plan,
            deleted = report.deleted,
            failed = report.failed_patterns.len(),
            "Invalidation complete"
        );

        if request.is_local()
            && let Some(broadcaster) = &self.broadcaster
        {
            broadcaster.publish(&request);
        }

        report
    }

    async fn execute(&self, plan: &InvalidationPlan, report: &mut InvalidationReport) {
        let keys = plan.key_list();
        match self.cache.delete_keys(&keys).await {
            Ok(count) => report.deleted += count,
            Err(err) => {
                warn!(
                    target: "atrium::invalidator",
                    keys = keys.len(),
                    error = %err,
                    "failed to delete exact keys"
                );
                report.failed_patterns.extend(keys);
            }
        }

        for pattern in &plan.patterns {
            let rendered = pattern.render();
            match self.cache.delete_matching(&rendered).await {
                Ok(count) => report.deleted += count,
                Err(err) => {
                    warn!(
                        target: "atrium::invalidator",
                        pattern = %rendered,
                        error = %err,
                        "failed to delete pattern"
                    );
                    report.failed_patterns.push(rendered);
                }
            }
        }
    }
}
