use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::repos::UpdateCourseParams;
use crate::cache::InvalidationReport;
use crate::domain::entities::{CourseRecord, EnrollmentRecord, ReviewRecord};
use crate::domain::types::CourseStatus;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CourseUpdateRequest {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub price_cents: Option<i64>,
    pub status: Option<CourseStatus>,
}

impl CourseUpdateRequest {
    pub fn into_params(self, id: Uuid) -> UpdateCourseParams {
        UpdateCourseParams {
            id,
            title: self.title,
            summary: self.summary,
            price_cents: self.price_cents,
            status: self.status,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCreateRequest {
    pub rating: i16,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseUpdateResponse {
    pub course: CourseRecord,
    pub invalidation: Option<InvalidationReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentResponse {
    pub enrollment: EnrollmentRecord,
    pub created: bool,
    pub invalidation: Option<InvalidationReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    pub review: ReviewRecord,
    pub invalidation: Option<InvalidationReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewResponse {
    pub first_view: bool,
    pub view_count: i64,
    pub invalidation: Option<InvalidationReport>,
}
