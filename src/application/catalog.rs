//! Catalog writes.
//!
//! Each operation performs the authoritative write, then runs the invalidator
//! before returning, so the caller's next read never observes a snapshot
//! cached before the write.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::application::repos::{
    CoursesRepo, CreateReviewParams, EnrollOutcome, EnrollmentsRepo, RecordViewOutcome,
    RepoError, ReviewsRepo, UpdateCourseParams,
};
use crate::cache::{InvalidationReport, InvalidationRequest, Invalidator};
use crate::domain::entities::{CourseRecord, ReviewRecord};
use crate::domain::error::DomainError;

const MAX_TITLE_LEN: usize = 200;
const MAX_REVIEW_LEN: usize = 5_000;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("only the course instructor may change it")]
    Forbidden,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// A committed write and the invalidation that followed it.
#[derive(Debug, Clone)]
pub struct CatalogWrite<T> {
    pub record: T,
    /// `None` when the write changed nothing cached.
    pub invalidation: Option<InvalidationReport>,
}

#[derive(Clone)]
pub struct CatalogService {
    courses: Arc<dyn CoursesRepo>,
    enrollments: Arc<dyn EnrollmentsRepo>,
    reviews: Arc<dyn ReviewsRepo>,
    invalidator: Invalidator,
}

impl CatalogService {
    pub fn new(
        courses: Arc<dyn CoursesRepo>,
        enrollments: Arc<dyn EnrollmentsRepo>,
        reviews: Arc<dyn ReviewsRepo>,
        invalidator: Invalidator,
    ) -> Self {
        Self {
            courses,
            enrollments,
            reviews,
            invalidator,
        }
    }

    #[instrument(skip(self, params), fields(course_id = %params.id))]
    pub async fn update_course(
        &self,
        actor: Uuid,
        params: UpdateCourseParams,
    ) -> Result<CatalogWrite<CourseRecord>, CatalogError> {
        validate_course_update(&params)?;

        let existing = self
            .courses
            .find_course(params.id)
            .await?
            .ok_or(CatalogError::NotFound { entity: "course" })?;
        if existing.instructor_id != actor {
            return Err(CatalogError::Forbidden);
        }

        let course = self.courses.update_course(params).await?;
        let report = self
            .invalidator
            .invalidate(InvalidationRequest::course(course.id).with_user(actor))
            .await;

        info!(
            target: "atrium::catalog",
            course_id = %course.id,
            deleted = report.deleted,
            "course updated"
        );
        Ok(CatalogWrite {
            record: course,
            invalidation: Some(report),
        })
    }

    #[instrument(skip(self))]
    pub async fn enroll(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<CatalogWrite<EnrollOutcome>, CatalogError> {
        self.require_public_course(course_id).await?;

        let outcome = self.enrollments.enroll(user_id, course_id).await?;
        let invalidation = if outcome.created {
            Some(
                self.invalidator
                    .invalidate(InvalidationRequest::enrollment(course_id, user_id))
                    .await,
            )
        } else {
            None
        };

        Ok(CatalogWrite {
            record: outcome,
            invalidation,
        })
    }

    #[instrument(skip(self, body))]
    pub async fn post_review(
        &self,
        author_id: Uuid,
        course_id: Uuid,
        rating: i16,
        body: String,
    ) -> Result<CatalogWrite<ReviewRecord>, CatalogError> {
        if !(1..=5).contains(&rating) {
            return Err(DomainError::validation("rating must be between 1 and 5").into());
        }
        let body = body.trim().to_string();
        if body.chars().count() > MAX_REVIEW_LEN {
            return Err(DomainError::validation(format!(
                "review body must be at most {MAX_REVIEW_LEN} characters"
            ))
            .into());
        }
        self.require_public_course(course_id).await?;

        let review = self
            .reviews
            .create_review(CreateReviewParams {
                course_id,
                author_id,
                rating,
                body,
            })
            .await?;
        let report = self
            .invalidator
            .invalidate(InvalidationRequest::review(course_id, author_id))
            .await;

        Ok(CatalogWrite {
            record: review,
            invalidation: Some(report),
        })
    }

    /// Count a user's first view of a course.
    ///
    /// Repeat views change nothing, so only first views invalidate the
    /// snapshots carrying the view counter.
    #[instrument(skip(self))]
    pub async fn record_view(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<CatalogWrite<RecordViewOutcome>, CatalogError> {
        self.require_public_course(course_id).await?;

        let outcome = self.courses.record_view(user_id, course_id).await?;
        let invalidation = if outcome.first_view {
            Some(
                self.invalidator
                    .invalidate(InvalidationRequest::course_view(course_id))
                    .await,
            )
        } else {
            None
        };

        Ok(CatalogWrite {
            record: outcome,
            invalidation,
        })
    }

    async fn require_public_course(&self, course_id: Uuid) -> Result<CourseRecord, CatalogError> {
        self.courses
            .find_course(course_id)
            .await?
            .filter(|course| course.status.is_public())
            .ok_or(CatalogError::NotFound { entity: "course" })
    }
}

fn validate_course_update(params: &UpdateCourseParams) -> Result<(), DomainError> {
    if let Some(title) = &params.title {
        let len = title.trim().chars().count();
        if len == 0 || len > MAX_TITLE_LEN {
            return Err(DomainError::validation(format!(
                "title must be between 1 and {MAX_TITLE_LEN} characters"
            )));
        }
    }
    if params.price_cents.is_some_and(|price| price < 0) {
        return Err(DomainError::validation("price must not be negative"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_title_is_rejected() {
        let params = UpdateCourseParams {
            title: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(validate_course_update(&params).is_err());
    }

    #[test]
    fn negative_price_is_rejected() {
        let params = UpdateCourseParams {
            price_cents: Some(-1),
            ..Default::default()
        };
        assert!(validate_course_update(&params).is_err());
    }

    #[test]
    fn empty_patch_is_valid() {
        assert!(validate_course_update(&UpdateCourseParams::default()).is_ok());
    }
}
