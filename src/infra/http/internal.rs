//! Peer-to-peer invalidation receiver.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, info};

use crate::cache::{BroadcastMessage, SECRET_HEADER};

use super::AppState;
use super::api::{ApiError, json_error};

/// Apply an invalidation sent by a peer. Never re-broadcast.
pub async fn receive_invalidation(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<BroadcastMessage>, JsonRejection>,
) -> Result<Response, ApiError> {
    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok());

    let broadcaster = state.invalidator.broadcaster();
    if let Some(broadcaster) = broadcaster
        && !broadcaster.verify_secret(provided)
    {
        return Err(ApiError::unauthorized());
    }

    let Json(message) = payload.map_err(json_error)?;

    if broadcaster.is_some_and(|broadcaster| broadcaster.is_own_message(&message)) {
        debug!(
            target: "atrium::invalidator",
            resource = %message.resource_type,
            "ignoring own broadcast"
        );
        return Ok(StatusCode::ACCEPTED.into_response());
    }

    let request = message.into_request();
    info!(
        target: "atrium::invalidator",
        resource = %request.resource_type,
        resource_id = ?request.resource_id,
        "applying remote invalidation"
    );
    let report = state.invalidator.invalidate(request).await;

    Ok((StatusCode::ACCEPTED, Json(report)).into_response())
}
