use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{RepoError, UsersRepo},
    domain::entities::{AvatarRecord, GoalRecord, SessionRecord, UserRecord},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    display_name: String,
    email: String,
    xp: i64,
    level: i32,
    avatar_id: Option<Uuid>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            display_name: row.display_name,
            email: row.email,
            xp: row.xp,
            level: row.level,
            avatar_id: row.avatar_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AvatarRow {
    id: Uuid,
    user_id: Uuid,
    url: String,
    updated_at: OffsetDateTime,
}

impl From<AvatarRow> for AvatarRecord {
    fn from(row: AvatarRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            url: row.url,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct GoalRow {
    id: Uuid,
    user_id: Uuid,
    title: String,
    progress: i32,
    target: i32,
    completed: bool,
    created_at: OffsetDateTime,
}

impl From<GoalRow> for GoalRecord {
    fn from(row: GoalRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            progress: row.progress,
            target: row.target,
            completed: row.completed,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    device: String,
    two_factor_verified: bool,
    last_seen_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            device: row.device,
            two_factor_verified: row.two_factor_verified,
            last_seen_at: row.last_seen_at,
            expires_at: row.expires_at,
        }
    }
}

const USER_COLUMNS: &str =
    "id, username, display_name, email, xp, level, avatar_id, created_at, updated_at";

#[async_trait]
impl UsersRepo for PostgresRepositories {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserRecord>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(UserRecord::from))
    }

    async fn list_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<UserRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(UserRecord::from).collect())
    }

    async fn list_avatars_for_users(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<AvatarRecord>, RepoError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, AvatarRow>(
            r#"
            SELECT id, user_id, url, updated_at
            FROM avatars
            WHERE user_id = ANY($1)
            "#,
        )
        .bind(user_ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(AvatarRecord::from).collect())
    }

    async fn list_goals(&self, user_id: Uuid) -> Result<Vec<GoalRecord>, RepoError> {
        let rows = sqlx::query_as::<_, GoalRow>(
            r#"
            SELECT id, user_id, title, progress, target, completed, created_at
            FROM goals
            WHERE user_id = $1
            ORDER BY completed ASC, created_at DESC, id
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(GoalRecord::from).collect())
    }

    async fn list_active_sessions(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Vec<SessionRecord>, RepoError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, device, two_factor_verified, last_seen_at, expires_at
            FROM sessions
            WHERE user_id = $1 AND expires_at > $2
            ORDER BY last_seen_at DESC, id
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(SessionRecord::from).collect())
    }
}
