use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{CoursesRepo, RecordViewOutcome, RepoError, UpdateCourseParams},
    domain::{
        entities::{CourseCounters, CourseRecord},
        types::CourseStatus,
    },
};

use super::{PostgresRepositories, map_sqlx_error, util::convert_count};

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: Uuid,
    slug: String,
    title: String,
    summary: String,
    instructor_id: Uuid,
    price_cents: i64,
    currency: String,
    status: CourseStatus,
    view_count: i64,
    published_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<CourseRow> for CourseRecord {
    fn from(row: CourseRow) -> Self {
        Self {
            id: row.id,
            slug: row.slug,
            title: row.title,
            summary: row.summary,
            instructor_id: row.instructor_id,
            price_cents: row.price_cents,
            currency: row.currency,
            status: row.status,
            view_count: row.view_count,
            published_at: row.published_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CountersRow {
    course_id: Uuid,
    view_count: i64,
    enrollment_count: i64,
    review_count: i64,
    average_rating: Option<f64>,
}

const COURSE_COLUMNS: &str = "id, slug, title, summary, instructor_id, price_cents, currency, \
     status, view_count, published_at, created_at, updated_at";

#[async_trait]
impl CoursesRepo for PostgresRepositories {
    async fn list_published_courses(&self) -> Result<Vec<CourseRecord>, RepoError> {
        let rows = sqlx::query_as::<_, CourseRow>(&format!(
            "SELECT {COURSE_COLUMNS} FROM courses \
             WHERE status = 'published' \
             ORDER BY COALESCE(published_at, created_at) DESC, id ASC"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(CourseRecord::from).collect())
    }

    async fn find_course(&self, id: Uuid) -> Result<Option<CourseRecord>, RepoError> {
        let row = sqlx::query_as::<_, CourseRow>(&format!(
            "SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(CourseRecord::from))
    }

    async fn update_course(&self, params: UpdateCourseParams) -> Result<CourseRecord, RepoError> {
        let row = sqlx::query_as::<_, CourseRow>(&format!(
            "UPDATE courses SET \
                 title = COALESCE($2, title), \
                 summary = COALESCE($3, summary), \
                 price_cents = COALESCE($4, price_cents), \
                 status = COALESCE($5::course_status, status), \
                 published_at = CASE \
                     WHEN $5::course_status = 'published' AND published_at IS NULL THEN now() \
                     ELSE published_at \
                 END, \
                 updated_at = now() \
             WHERE id = $1 \
             RETURNING {COURSE_COLUMNS}"
        ))
        .bind(params.id)
        .bind(params.title.as_deref().map(str::trim))
        .bind(params.summary.as_deref())
        .bind(params.price_cents)
        .bind(params.status)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(CourseRecord::from).ok_or(RepoError::NotFound)
    }

    async fn course_counters(&self, course_id: Uuid) -> Result<CourseCounters, RepoError> {
        let row = sqlx::query_as::<_, CountersRow>(
            r#"
            SELECT
                c.id AS course_id,
                c.view_count,
                (
                    SELECT COUNT(*) FROM enrollments e
                    WHERE e.course_id = c.id AND e.status <> 'refunded'
                ) AS enrollment_count,
                (SELECT COUNT(*) FROM reviews r WHERE r.course_id = c.id) AS review_count,
                (SELECT AVG(r.rating)::float8 FROM reviews r WHERE r.course_id = c.id) AS average_rating
            FROM courses c
            WHERE c.id = $1
            "#,
        )
        .bind(course_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;

        Ok(CourseCounters {
            course_id: row.course_id,
            enrollment_count: convert_count(row.enrollment_count)?,
            review_count: convert_count(row.review_count)?,
            average_rating: row.average_rating,
            view_count: convert_count(row.view_count)?,
        })
    }

    async fn record_view(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<RecordViewOutcome, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        // The insert itself decides whether this is the user's first view.
        let inserted = sqlx::query(
            r#"
            INSERT INTO course_views (user_id, course_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, course_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(course_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected()
            == 1;

        let view_count: i64 = if inserted {
            sqlx::query_scalar(
                "UPDATE courses SET view_count = view_count + 1 WHERE id = $1 RETURNING view_count",
            )
            .bind(course_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
        } else {
            sqlx::query_scalar("SELECT view_count FROM courses WHERE id = $1")
                .bind(course_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_error)?
        };

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(RecordViewOutcome {
            first_view: inserted,
            view_count,
        })
    }
}
