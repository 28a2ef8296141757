pub mod error;
mod handlers;
mod identity;
mod models;
mod response;

pub use error::{ApiError, codes};
pub use identity::{RequestingUser, USER_HEADER, parse_id};
pub use response::{CDN_CACHE_CONTROL, SERVER_TIMING, X_CACHE, cache_directives};

pub(crate) use handlers::json_error;

use axum::{
    Router,
    routing::{get, post},
};

use super::AppState;

pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .route("/api/navbar", get(handlers::navbar))
        .route("/api/courses", get(handlers::list_courses))
        .route(
            "/api/courses/{id}",
            get(handlers::course_detail).patch(handlers::update_course),
        )
        .route("/api/courses/{id}/stats", get(handlers::course_stats))
        .route("/api/courses/{id}/enrollments", post(handlers::enroll))
        .route("/api/courses/{id}/reviews", post(handlers::post_review))
        .route("/api/courses/{id}/views", post(handlers::record_view))
        .route("/api/checkout/{course_id}", get(handlers::checkout))
        .route("/api/me/enrollments", get(handlers::my_enrollments))
}
