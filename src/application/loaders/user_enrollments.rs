use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use super::{LoadOutcome, LoaderError, SnapshotLoader};
use crate::application::snapshots::UserEnrollmentsSnapshot;
use crate::cache::CacheKey;

impl SnapshotLoader {
    /// The requesting user's enrollments. Requires identity.
    #[instrument(skip(self))]
    pub async fn user_enrollments(
        &self,
        user: Option<Uuid>,
    ) -> Result<LoadOutcome<UserEnrollmentsSnapshot>, LoaderError> {
        let user_id = user.ok_or(LoaderError::Unauthorized)?;
        let key = CacheKey::user_enrollments(user_id);
        self.cached("user_enrollments", Some(key), self.ttls.user_secs, || {
            self.build_user_enrollments(user_id)
        })
        .await
    }

    async fn build_user_enrollments(
        &self,
        user_id: Uuid,
    ) -> Result<UserEnrollmentsSnapshot, LoaderError> {
        let enrollments = self.repos.enrollments.list_for_user(user_id).await?;
        Ok(UserEnrollmentsSnapshot {
            user_id,
            enrollments,
            timestamp: OffsetDateTime::now_utc(),
        })
    }
}
