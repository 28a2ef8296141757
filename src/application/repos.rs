//! Repository traits describing persistence adapters.
//!
//! Loaders only ever read through these traits. Every multi-entity read is a
//! bulk read keyed by a slice of ids so aggregation never degrades into one
//! query per row.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{
    AvatarRecord, CourseCounters, CourseRecord, EnrollmentRecord, GoalRecord, ReviewRecord,
    SessionRecord, UserRecord,
};
use crate::domain::types::CourseStatus;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateCourseParams {
    pub id: Uuid,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub price_cents: Option<i64>,
    pub status: Option<CourseStatus>,
}

#[derive(Debug, Clone)]
pub struct CreateReviewParams {
    pub course_id: Uuid,
    pub author_id: Uuid,
    pub rating: i16,
    pub body: String,
}

/// Result of an insert-if-absent enrollment write.
#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    pub enrollment: EnrollmentRecord,
    pub created: bool,
}

/// Result of recording a course view.
///
/// `first_view` comes from the write itself (the view row was inserted rather
/// than already present), never from comparing timestamps after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordViewOutcome {
    pub first_view: bool,
    pub view_count: i64,
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserRecord>, RepoError>;

    async fn list_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<UserRecord>, RepoError>;

    /// Avatars owned by the given users (at most one per user).
    async fn list_avatars_for_users(
        &self,
        user_ids: &[Uuid],
    ) -> Result<Vec<AvatarRecord>, RepoError>;

    async fn list_goals(&self, user_id: Uuid) -> Result<Vec<GoalRecord>, RepoError>;

    async fn list_active_sessions(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Vec<SessionRecord>, RepoError>;
}

#[async_trait]
pub trait CoursesRepo: Send + Sync {
    /// Published courses, newest first, ties broken by id.
    async fn list_published_courses(&self) -> Result<Vec<CourseRecord>, RepoError>;

    async fn find_course(&self, id: Uuid) -> Result<Option<CourseRecord>, RepoError>;

    async fn update_course(&self, params: UpdateCourseParams) -> Result<CourseRecord, RepoError>;

    /// Counters for one course; `RepoError::NotFound` when the course does not exist.
    async fn course_counters(&self, course_id: Uuid) -> Result<CourseCounters, RepoError>;

    async fn record_view(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<RecordViewOutcome, RepoError>;
}

#[async_trait]
pub trait EnrollmentsRepo: Send + Sync {
    /// Enrollment counts for the given courses; courses without enrollments may be absent.
    async fn count_by_courses(&self, course_ids: &[Uuid]) -> Result<HashMap<Uuid, u64>, RepoError>;

    async fn list_for_user_in_courses(
        &self,
        user_id: Uuid,
        course_ids: &[Uuid],
    ) -> Result<Vec<EnrollmentRecord>, RepoError>;

    async fn find_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<EnrollmentRecord>, RepoError>;

    /// Every enrollment of one user, most recent first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<EnrollmentRecord>, RepoError>;

    async fn count_for_user(&self, user_id: Uuid) -> Result<u64, RepoError>;

    async fn enroll(&self, user_id: Uuid, course_id: Uuid) -> Result<EnrollOutcome, RepoError>;
}

#[async_trait]
pub trait ReviewsRepo: Send + Sync {
    async fn list_for_course(
        &self,
        course_id: Uuid,
        limit: u32,
    ) -> Result<Vec<ReviewRecord>, RepoError>;

    async fn create_review(&self, params: CreateReviewParams) -> Result<ReviewRecord, RepoError>;
}
