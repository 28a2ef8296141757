use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{CreateReviewParams, RepoError, ReviewsRepo},
    domain::entities::ReviewRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: Uuid,
    course_id: Uuid,
    author_id: Uuid,
    rating: i16,
    body: String,
    created_at: OffsetDateTime,
}

impl From<ReviewRow> for ReviewRecord {
    fn from(row: ReviewRow) -> Self {
        Self {
            id: row.id,
            course_id: row.course_id,
            author_id: row.author_id,
            rating: row.rating,
            body: row.body,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl ReviewsRepo for PostgresRepositories {
    async fn list_for_course(
        &self,
        course_id: Uuid,
        limit: u32,
    ) -> Result<Vec<ReviewRecord>, RepoError> {
        let rows = sqlx::query_as::<_, ReviewRow>(
            r#"
            SELECT id, course_id, author_id, rating, body, created_at
            FROM reviews
            WHERE course_id = $1
            ORDER BY created_at DESC, id
            LIMIT $2
            "#,
        )
        .bind(course_id)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ReviewRecord::from).collect())
    }

    async fn create_review(&self, params: CreateReviewParams) -> Result<ReviewRecord, RepoError> {
        let row = sqlx::query_as::<_, ReviewRow>(
            r#"
            INSERT INTO reviews (id, course_id, author_id, rating, body)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, course_id, author_id, rating, body, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(params.course_id)
        .bind(params.author_id)
        .bind(params.rating)
        .bind(&params.body)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }
}
