use time::OffsetDateTime;
use tokio::try_join;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{LoadOutcome, LoaderError, SnapshotLoader};
use crate::application::snapshots::NavbarSnapshot;
use crate::cache::CacheKey;

impl SnapshotLoader {
    /// Navbar for the requesting user.
    ///
    /// Anonymous visitors and unknown ids get a reduced snapshot, never an
    /// error. The anonymous variant is not cached.
    #[instrument(skip(self))]
    pub async fn navbar(
        &self,
        user: Option<Uuid>,
    ) -> Result<LoadOutcome<NavbarSnapshot>, LoaderError> {
        let key = user.map(CacheKey::navbar);
        self.cached("navbar", key, self.ttls.user_secs, || {
            self.build_navbar(user)
        })
        .await
    }

    async fn build_navbar(&self, user: Option<Uuid>) -> Result<NavbarSnapshot, LoaderError> {
        let now = OffsetDateTime::now_utc();
        let Some(user_id) = user else {
            return Ok(NavbarSnapshot::reduced(now));
        };

        let owner = [user_id];
        let (user, avatars, goals, sessions, enrollment_count) = try_join!(
            self.repos.users.find_user(user_id),
            self.repos.users.list_avatars_for_users(&owner),
            self.repos.users.list_goals(user_id),
            self.repos.users.list_active_sessions(user_id, now),
            self.repos.enrollments.count_for_user(user_id),
        )?;

        let Some(user) = user else {
            info!(
                target: "atrium::loader",
                user_id = %user_id,
                "navbar requested for unknown user; serving reduced snapshot"
            );
            return Ok(NavbarSnapshot::reduced(now));
        };

        let avatar = avatars
            .into_iter()
            .find(|avatar| Some(avatar.id) == user.avatar_id);

        Ok(NavbarSnapshot {
            user: Some(user),
            avatar,
            goals,
            sessions,
            enrollment_count,
            timestamp: now,
        })
    }
}
