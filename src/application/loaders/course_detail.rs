use std::collections::BTreeMap;

use time::OffsetDateTime;
use tokio::try_join;
use tracing::instrument;
use uuid::Uuid;

use super::{DETAIL_REVIEW_LIMIT, LoadOutcome, LoaderError, SnapshotLoader, unique_ids};
use crate::application::repos::RepoError;
use crate::application::snapshots::{CourseDetailSnapshot, CourseStats};
use crate::cache::{Audience, CacheKey};
use crate::domain::entities::EnrollmentRecord;
use crate::domain::error::DomainError;

impl SnapshotLoader {
    /// One course with its instructor, recent reviews and their authors,
    /// stats, and the requesting user's enrollment.
    ///
    /// Unpublished courses are visible to their instructor only.
    #[instrument(skip(self))]
    pub async fn course_detail(
        &self,
        course_id: Uuid,
        user: Option<Uuid>,
    ) -> Result<LoadOutcome<CourseDetailSnapshot>, LoaderError> {
        let key = CacheKey::course_detail(course_id, Audience::from_user(user));
        let ttl = self.ttls.for_audience(user);
        self.cached("course_detail", Some(key), ttl, || {
            self.build_course_detail(course_id, user)
        })
        .await
    }

    /// Assemble the anonymous detail of a course without reading or writing
    /// the cache. Used by batch writers that store the result themselves.
    pub(crate) async fn assemble_public_course_detail(
        &self,
        course_id: Uuid,
    ) -> Result<CourseDetailSnapshot, LoaderError> {
        self.build_course_detail(course_id, None).await
    }

    async fn build_course_detail(
        &self,
        course_id: Uuid,
        user: Option<Uuid>,
    ) -> Result<CourseDetailSnapshot, LoaderError> {
        let now = OffsetDateTime::now_utc();
        let course = self
            .repos
            .courses
            .find_course(course_id)
            .await?
            .ok_or(LoaderError::not_found("course"))?;

        if !course.status.is_public() && user != Some(course.instructor_id) {
            return Err(LoaderError::not_found("course"));
        }

        let instructor_ids = [course.instructor_id];
        let (instructor, avatars, reviews, counters, enrollment) = try_join!(
            self.repos.users.find_user(course.instructor_id),
            self.repos.users.list_avatars_for_users(&instructor_ids),
            self.repos
                .reviews
                .list_for_course(course_id, DETAIL_REVIEW_LIMIT),
            self.repos.courses.course_counters(course_id),
            self.own_enrollment(user, course_id),
        )?;

        let instructor = instructor.ok_or_else(|| {
            DomainError::invariant(format!(
                "course {course_id} references missing instructor {}",
                course.instructor_id
            ))
        })?;
        let instructor_avatar = avatars
            .into_iter()
            .find(|avatar| Some(avatar.id) == instructor.avatar_id);

        let author_ids = unique_ids(reviews.iter().map(|review| review.author_id));
        let reviewers: BTreeMap<_, _> = if author_ids.is_empty() {
            BTreeMap::new()
        } else {
            self.repos
                .users
                .list_users_by_ids(&author_ids)
                .await?
                .into_iter()
                .map(|reviewer| (reviewer.id, reviewer))
                .collect()
        };

        let snapshot = CourseDetailSnapshot {
            course,
            instructor,
            instructor_avatar,
            reviews,
            reviewers,
            stats: CourseStats::from_counters(counters, now),
            enrollment,
            timestamp: now,
        };
        snapshot.check_references()?;
        Ok(snapshot)
    }

    async fn own_enrollment(
        &self,
        user: Option<Uuid>,
        course_id: Uuid,
    ) -> Result<Option<EnrollmentRecord>, RepoError> {
        match user {
            Some(user_id) => {
                self.repos
                    .enrollments
                    .find_enrollment(user_id, course_id)
                    .await
            }
            None => Ok(None),
        }
    }
}
