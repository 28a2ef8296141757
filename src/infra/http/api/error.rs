use std::error::Error as StdError;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::catalog::CatalogError;
use crate::application::error::ErrorReport;
use crate::application::loaders::LoaderError;
use crate::application::repos::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FORBIDDEN: &str = "forbidden";
    pub const NOT_FOUND: &str = "not_found";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const DUPLICATE: &str = "duplicate";
    pub const INTEGRITY: &str = "integrity_error";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const UNAVAILABLE: &str = "unavailable";
    pub const INCONSISTENT: &str = "inconsistent_snapshot";
    pub const REPO: &str = "repo_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// JSON error response with a diagnostic chain kept out of the body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    chain: Vec<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            chain: Vec::new(),
        }
    }

    fn caused_by(mut self, err: &dyn StdError) -> Self {
        let report = ErrorReport::from_error("infra::http::api", self.status, err);
        self.chain = report.messages;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Authentication required",
            None,
        )
    }

    pub fn forbidden(hint: Option<String>) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            codes::FORBIDDEN,
            "Not allowed to modify this resource",
            hint,
        )
    }

    pub fn not_found(entity: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            "Resource not found",
            Some(format!("{entity} not found")),
        )
    }

    pub fn from_repo(err: RepoError) -> Self {
        let mapped = match &err {
            RepoError::NotFound => return Self::not_found("resource"),
            RepoError::Duplicate { constraint } => Self::new(
                StatusCode::CONFLICT,
                codes::DUPLICATE,
                "Duplicate record",
                Some(constraint.clone()),
            ),
            RepoError::InvalidInput { message } => Self::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_INPUT,
                "Invalid input",
                Some(message.clone()),
            ),
            RepoError::Integrity { message } => Self::new(
                StatusCode::CONFLICT,
                codes::INTEGRITY,
                "Integrity constraint violated",
                Some(message.clone()),
            ),
            RepoError::Timeout => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::DB_TIMEOUT,
                "Database timeout",
                Some("retry the request".into()),
            ),
            RepoError::Persistence(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::REPO,
                "Persistence error",
                None,
            ),
        };
        mapped.caused_by(&err)
    }
}

impl From<LoaderError> for ApiError {
    fn from(err: LoaderError) -> Self {
        match err {
            LoaderError::NotFound { entity } => Self::not_found(entity),
            LoaderError::Unauthorized => Self::unauthorized(),
            LoaderError::Transient(RepoError::Timeout) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::DB_TIMEOUT,
                "Database timeout",
                Some("retry the request".into()),
            ),
            LoaderError::Transient(ref source) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::UNAVAILABLE,
                "Data source unavailable",
                Some("retry the request".into()),
            )
            .caused_by(source),
            LoaderError::Inconsistent(ref source) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::INCONSISTENT,
                "Snapshot could not be assembled consistently",
                None,
            )
            .caused_by(source),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Validation(source) => Self::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_INPUT,
                "Invalid input",
                Some(source.to_string()),
            ),
            CatalogError::NotFound { entity } => Self::not_found(entity),
            CatalogError::Forbidden => {
                Self::forbidden(Some("only the course instructor may change it".into()))
            }
            CatalogError::Repo(source) => Self::from_repo(source),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = if self.chain.is_empty() {
            ErrorReport::from_message(
                "infra::http::api",
                self.status,
                format!(
                    "{}: {}",
                    self.code,
                    self.hint.as_deref().unwrap_or(self.message)
                ),
            )
        } else {
            ErrorReport {
                source: "infra::http::api",
                status: self.status,
                messages: self.chain,
            }
        };

        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::DomainError;

    #[test]
    fn loader_errors_map_to_distinct_statuses() {
        assert_eq!(
            ApiError::from(LoaderError::not_found("course")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(LoaderError::Unauthorized).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(LoaderError::Transient(RepoError::Timeout)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(LoaderError::Inconsistent(DomainError::invariant("x"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn forbidden_catalog_write_is_403() {
        let err = ApiError::from(CatalogError::Forbidden);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), codes::FORBIDDEN);
    }

    #[test]
    fn response_carries_report_with_source_chain() {
        let err = ApiError::from(LoaderError::Transient(RepoError::from_persistence(
            "connection reset",
        )));
        let response = err.into_response();

        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(
            report
                .messages
                .iter()
                .any(|message| message.contains("connection reset"))
        );
    }
}
