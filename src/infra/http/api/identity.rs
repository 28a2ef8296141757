use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use super::error::ApiError;

/// Header carrying the caller's verified user id, set by the auth proxy.
pub const USER_HEADER: &str = "x-user-id";

/// Requesting user; `None` for anonymous visitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestingUser(pub Option<Uuid>);

impl RequestingUser {
    pub fn id(&self) -> Option<Uuid> {
        self.0
    }

    pub fn require(&self) -> Result<Uuid, ApiError> {
        self.0.ok_or_else(ApiError::unauthorized)
    }
}

impl<S> FromRequestParts<S> for RequestingUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(USER_HEADER) else {
            return Ok(Self(None));
        };

        let raw = value
            .to_str()
            .map_err(|_| ApiError::bad_request("Malformed user id", None))?
            .trim();
        if raw.is_empty() {
            return Ok(Self(None));
        }

        Uuid::parse_str(raw).map(|id| Self(Some(id))).map_err(|err| {
            ApiError::bad_request(
                "Malformed user id",
                Some(format!("`{USER_HEADER}` must be a UUID: {err}")),
            )
        })
    }
}

/// Parse a path segment as a UUID, answering 400 with a JSON body otherwise.
pub fn parse_id(raw: &str, what: &'static str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::bad_request("Malformed id", Some(format!("{what} must be a UUID"))))
}
