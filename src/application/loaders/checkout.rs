use time::OffsetDateTime;
use tokio::try_join;
use tracing::instrument;
use uuid::Uuid;

use super::{LoadOutcome, LoaderError, SnapshotLoader};
use crate::application::snapshots::CheckoutSnapshot;
use crate::domain::error::DomainError;

impl SnapshotLoader {
    /// Checkout prerequisites. Always read from the authoritative store.
    #[instrument(skip(self))]
    pub async fn checkout(
        &self,
        course_id: Uuid,
        user: Option<Uuid>,
    ) -> Result<LoadOutcome<CheckoutSnapshot>, LoaderError> {
        let user_id = user.ok_or(LoaderError::Unauthorized)?;
        self.cached("checkout", None, 0, || self.build_checkout(course_id, user_id))
            .await
    }

    async fn build_checkout(
        &self,
        course_id: Uuid,
        user_id: Uuid,
    ) -> Result<CheckoutSnapshot, LoaderError> {
        let now = OffsetDateTime::now_utc();
        let (user, course, existing_enrollment, sessions) = try_join!(
            self.repos.users.find_user(user_id),
            self.repos.courses.find_course(course_id),
            self.repos.enrollments.find_enrollment(user_id, course_id),
            self.repos.users.list_active_sessions(user_id, now),
        )?;

        let user = user.ok_or(LoaderError::Unauthorized)?;
        let course = course
            .filter(|course| course.status.is_public())
            .ok_or(LoaderError::not_found("course"))?;

        let instructor = self
            .repos
            .users
            .find_user(course.instructor_id)
            .await?
            .ok_or_else(|| {
                DomainError::invariant(format!(
                    "course {course_id} references missing instructor {}",
                    course.instructor_id
                ))
            })?;

        let already_enrolled = existing_enrollment
            .as_ref()
            .is_some_and(|enrollment| enrollment.status.grants_access());
        let two_factor_verified = sessions.iter().any(|session| session.two_factor_verified);

        Ok(CheckoutSnapshot {
            price_cents: course.price_cents,
            currency: course.currency.clone(),
            user,
            course,
            instructor,
            existing_enrollment,
            already_enrolled,
            two_factor_verified,
            timestamp: now,
        })
    }
}
