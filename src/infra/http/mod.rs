pub mod api;
mod internal;
mod middleware;

pub use middleware::RequestContext;

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::catalog::CatalogService;
use crate::application::error::ErrorReport;
use crate::application::loaders::SnapshotLoader;
use crate::application::repos::RepoError;
use crate::cache::{BROADCAST_PATH, CacheClient, Invalidator};
use crate::infra::db::{PostgresRepositories, map_sqlx_error};

use self::middleware::{log_responses, set_request_context};

/// Liveness probe of the authoritative store.
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn probe(&self) -> Result<(), RepoError>;
}

#[async_trait]
impl DatabaseProbe for PostgresRepositories {
    async fn probe(&self) -> Result<(), RepoError> {
        self.health_check().await.map_err(map_sqlx_error)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub loader: Arc<SnapshotLoader>,
    pub catalog: Arc<CatalogService>,
    pub invalidator: Invalidator,
    pub cache: Arc<CacheClient>,
    pub db: Arc<dyn DatabaseProbe>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::build_api_router())
        .route(BROADCAST_PATH, post(internal::receive_invalidation))
        .route("/_health/db", get(db_health))
        .route("/_health/cache", get(cache_health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn db_health(State(state): State<AppState>) -> Response {
    health_response("infra::http::db_health", state.db.probe().await)
}

async fn cache_health(State(state): State<AppState>) -> Response {
    health_response("infra::http::cache_health", state.cache.ping().await)
}

fn health_response<E>(source: &'static str, result: Result<(), E>) -> Response
where
    E: std::error::Error,
{
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(source, StatusCode::SERVICE_UNAVAILABLE, &err).attach(&mut response);
            response
        }
    }
}
