use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{EnrollOutcome, EnrollmentsRepo, RepoError},
    domain::{entities::EnrollmentRecord, types::EnrollmentStatus},
};

use super::{PostgresRepositories, map_sqlx_error, util::convert_count};

#[derive(sqlx::FromRow)]
struct EnrollmentRow {
    id: Uuid,
    user_id: Uuid,
    course_id: Uuid,
    status: EnrollmentStatus,
    progress_percent: i32,
    enrolled_at: OffsetDateTime,
}

impl From<EnrollmentRow> for EnrollmentRecord {
    fn from(row: EnrollmentRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            course_id: row.course_id,
            status: row.status,
            progress_percent: row.progress_percent,
            enrolled_at: row.enrolled_at,
        }
    }
}

const ENROLLMENT_COLUMNS: &str = "id, user_id, course_id, status, progress_percent, enrolled_at";

#[async_trait]
impl EnrollmentsRepo for PostgresRepositories {
    async fn count_by_courses(&self, course_ids: &[Uuid]) -> Result<HashMap<Uuid, u64>, RepoError> {
        if course_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, (Uuid, i64)>(
            r#"
            SELECT course_id, COUNT(*)
            FROM enrollments
            WHERE course_id = ANY($1) AND status <> 'refunded'
            GROUP BY course_id
            "#,
        )
        .bind(course_ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let mut counts = HashMap::with_capacity(rows.len());
        for (course_id, count) in rows {
            counts.insert(course_id, convert_count(count)?);
        }
        Ok(counts)
    }

    async fn list_for_user_in_courses(
        &self,
        user_id: Uuid,
        course_ids: &[Uuid],
    ) -> Result<Vec<EnrollmentRecord>, RepoError> {
        if course_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments \
             WHERE user_id = $1 AND course_id = ANY($2)"
        ))
        .bind(user_id)
        .bind(course_ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(EnrollmentRecord::from).collect())
    }

    async fn find_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<EnrollmentRecord>, RepoError> {
        let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = $1 AND course_id = $2"
        ))
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(EnrollmentRecord::from))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<EnrollmentRecord>, RepoError> {
        let rows = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments \
             WHERE user_id = $1 ORDER BY enrolled_at DESC, id"
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(EnrollmentRecord::from).collect())
    }

    async fn count_for_user(&self, user_id: Uuid) -> Result<u64, RepoError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM enrollments WHERE user_id = $1 AND status <> 'refunded'",
        )
        .bind(user_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        convert_count(count)
    }

    async fn enroll(&self, user_id: Uuid, course_id: Uuid) -> Result<EnrollOutcome, RepoError> {
        let inserted = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "INSERT INTO enrollments (id, user_id, course_id, status) \
             VALUES ($1, $2, $3, 'active') \
             ON CONFLICT (user_id, course_id) DO NOTHING \
             RETURNING {ENROLLMENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = inserted {
            return Ok(EnrollOutcome {
                enrollment: row.into(),
                created: true,
            });
        }

        let existing = self
            .find_enrollment(user_id, course_id)
            .await?
            .ok_or(RepoError::NotFound)?;
        Ok(EnrollOutcome {
            enrollment: existing,
            created: false,
        })
    }
}
