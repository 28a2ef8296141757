use time::OffsetDateTime;
use tokio::try_join;
use tracing::instrument;
use uuid::Uuid;

use super::{LoadOutcome, LoaderError, SnapshotLoader};
use crate::application::snapshots::CourseStats;
use crate::cache::CacheKey;

impl SnapshotLoader {
    /// Counters of a published course, shared by every audience.
    #[instrument(skip(self))]
    pub async fn course_stats(
        &self,
        course_id: Uuid,
    ) -> Result<LoadOutcome<CourseStats>, LoaderError> {
        let key = CacheKey::course_stats(course_id);
        self.cached("course_stats", Some(key), self.ttls.stats_secs, || {
            self.build_course_stats(course_id)
        })
        .await
    }

    async fn build_course_stats(&self, course_id: Uuid) -> Result<CourseStats, LoaderError> {
        let now = OffsetDateTime::now_utc();
        let (course, counters) = try_join!(
            self.repos.courses.find_course(course_id),
            self.repos.courses.course_counters(course_id),
        )?;

        match course {
            Some(course) if course.status.is_public() => {
                Ok(CourseStats::from_counters(counters, now))
            }
            _ => Err(LoaderError::not_found("course")),
        }
    }
}
