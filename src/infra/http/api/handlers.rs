use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::infra::http::AppState;

use super::error::ApiError;
use super::identity::{RequestingUser, parse_id};
use super::models::{
    CourseUpdateRequest, CourseUpdateResponse, EnrollmentResponse, ReviewCreateRequest,
    ReviewResponse, ViewResponse,
};
use super::response::snapshot_response;

/// -------- Loaders --------
pub async fn navbar(
    State(state): State<AppState>,
    user: RequestingUser,
) -> Result<Response, ApiError> {
    let outcome = state.loader.navbar(user.id()).await?;
    Ok(snapshot_response(outcome))
}

pub async fn list_courses(
    State(state): State<AppState>,
    user: RequestingUser,
) -> Result<Response, ApiError> {
    let outcome = state.loader.course_list(user.id()).await?;
    Ok(snapshot_response(outcome))
}

pub async fn course_detail(
    State(state): State<AppState>,
    user: RequestingUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let course_id = parse_id(&id, "course id")?;
    let outcome = state.loader.course_detail(course_id, user.id()).await?;
    Ok(snapshot_response(outcome))
}

pub async fn course_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let course_id = parse_id(&id, "course id")?;
    let outcome = state.loader.course_stats(course_id).await?;
    Ok(snapshot_response(outcome))
}

pub async fn my_enrollments(
    State(state): State<AppState>,
    user: RequestingUser,
) -> Result<Response, ApiError> {
    let outcome = state.loader.user_enrollments(user.id()).await?;
    Ok(snapshot_response(outcome))
}

pub async fn checkout(
    State(state): State<AppState>,
    user: RequestingUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let course_id = parse_id(&id, "course id")?;
    let outcome = state.loader.checkout(course_id, user.id()).await?;
    Ok(snapshot_response(outcome))
}

/// -------- Writes --------
pub async fn update_course(
    State(state): State<AppState>,
    user: RequestingUser,
    Path(id): Path<String>,
    payload: Result<Json<CourseUpdateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let actor = user.require()?;
    let course_id = parse_id(&id, "course id")?;
    let Json(payload) = payload.map_err(json_error)?;

    let write = state
        .catalog
        .update_course(actor, payload.into_params(course_id))
        .await?;

    Ok(Json(CourseUpdateResponse {
        course: write.record,
        invalidation: write.invalidation,
    })
    .into_response())
}

pub async fn enroll(
    State(state): State<AppState>,
    user: RequestingUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let user_id = user.require()?;
    let course_id = parse_id(&id, "course id")?;

    let write = state.catalog.enroll(user_id, course_id).await?;
    let status = if write.record.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(EnrollmentResponse {
            enrollment: write.record.enrollment,
            created: write.record.created,
            invalidation: write.invalidation,
        }),
    )
        .into_response())
}

pub async fn post_review(
    State(state): State<AppState>,
    user: RequestingUser,
    Path(id): Path<String>,
    payload: Result<Json<ReviewCreateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let author_id = user.require()?;
    let course_id = parse_id(&id, "course id")?;
    let Json(payload) = payload.map_err(json_error)?;

    let write = state
        .catalog
        .post_review(author_id, course_id, payload.rating, payload.body)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ReviewResponse {
            review: write.record,
            invalidation: write.invalidation,
        }),
    )
        .into_response())
}

pub async fn record_view(
    State(state): State<AppState>,
    user: RequestingUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let user_id = user.require()?;
    let course_id = parse_id(&id, "course id")?;

    let write = state.catalog.record_view(user_id, course_id).await?;

    Ok(Json(ViewResponse {
        first_view: write.record.first_view,
        view_count: write.record.view_count,
        invalidation: write.invalidation,
    })
    .into_response())
}

pub(crate) fn json_error(rejection: JsonRejection) -> ApiError {
    ApiError::bad_request("Invalid JSON body", Some(rejection.body_text()))
}
