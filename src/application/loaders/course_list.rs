use std::collections::BTreeMap;

use time::OffsetDateTime;
use tokio::try_join;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{LoadOutcome, LoaderError, SnapshotLoader, unique_ids};
use crate::application::repos::RepoError;
use crate::application::snapshots::CourseListSnapshot;
use crate::cache::{Audience, CacheKey};
use crate::domain::entities::EnrollmentRecord;

impl SnapshotLoader {
    /// Published courses with instructors, avatars, enrollment counts and the
    /// requesting user's own enrollments.
    ///
    /// Two round trips regardless of the number of courses: the course list,
    /// then one concurrent batch of bulk reads keyed by the listed ids.
    #[instrument(skip(self))]
    pub async fn course_list(
        &self,
        user: Option<Uuid>,
    ) -> Result<LoadOutcome<CourseListSnapshot>, LoaderError> {
        let key = CacheKey::course_list(Audience::from_user(user));
        let ttl = self.ttls.for_audience(user);
        self.cached("course_list", Some(key), ttl, || self.build_course_list(user))
            .await
    }

    async fn build_course_list(
        &self,
        user: Option<Uuid>,
    ) -> Result<CourseListSnapshot, LoaderError> {
        let now = OffsetDateTime::now_utc();
        let courses = self.repos.courses.list_published_courses().await?;

        let course_ids: Vec<Uuid> = courses.iter().map(|course| course.id).collect();
        let instructor_ids = unique_ids(courses.iter().map(|course| course.instructor_id));

        let (users, avatars, counts, own_enrollments) = try_join!(
            self.repos.users.list_users_by_ids(&instructor_ids),
            self.repos.users.list_avatars_for_users(&instructor_ids),
            self.repos.enrollments.count_by_courses(&course_ids),
            self.own_enrollments(user, &course_ids),
        )?;

        debug!(
            target: "atrium::loader",
            courses = courses.len(),
            instructors = users.len(),
            "course list aggregated"
        );

        let users: BTreeMap<_, _> = users.into_iter().map(|user| (user.id, user)).collect();
        let avatars = avatars
            .into_iter()
            .filter(|avatar| {
                users
                    .get(&avatar.user_id)
                    .is_some_and(|owner| owner.avatar_id == Some(avatar.id))
            })
            .map(|avatar| (avatar.user_id, avatar))
            .collect();
        let enrollment_counts = course_ids
            .iter()
            .map(|id| (*id, counts.get(id).copied().unwrap_or(0)))
            .collect();
        let enrollments = own_enrollments
            .into_iter()
            .map(|enrollment| (enrollment.course_id, enrollment))
            .collect();

        let snapshot = CourseListSnapshot {
            courses,
            users,
            avatars,
            enrollments,
            enrollment_counts,
            timestamp: now,
        };
        snapshot.check_references()?;
        Ok(snapshot)
    }

    async fn own_enrollments(
        &self,
        user: Option<Uuid>,
        course_ids: &[Uuid],
    ) -> Result<Vec<EnrollmentRecord>, RepoError> {
        match user {
            Some(user_id) if !course_ids.is_empty() => {
                self.repos
                    .enrollments
                    .list_for_user_in_courses(user_id, course_ids)
                    .await
            }
            _ => Ok(Vec::new()),
        }
    }
}
