//! Snapshot responses and their caching headers.
//!
//! Downstream max-age always equals the loader TTL, so a CDN or browser never
//! holds a snapshot longer than this service's own cache would.

use axum::Json;
use axum::http::{HeaderMap, HeaderName, HeaderValue, header::CACHE_CONTROL};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::loaders::LoadOutcome;

pub const CDN_CACHE_CONTROL: HeaderName = HeaderName::from_static("cdn-cache-control");
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const SERVER_TIMING: HeaderName = HeaderName::from_static("server-timing");

const NO_STORE: &str = "private, no-store";

pub fn snapshot_response<T: Serialize>(outcome: LoadOutcome<T>) -> Response {
    let mut headers = HeaderMap::new();
    let (browser, cdn) = cache_directives(outcome.ttl, outcome.shared);
    insert(&mut headers, CACHE_CONTROL, browser);
    insert(&mut headers, CDN_CACHE_CONTROL, cdn);
    insert(&mut headers, X_CACHE, outcome.cache.as_str().to_string());
    insert(
        &mut headers,
        SERVER_TIMING,
        format!(
            "loader;dur={:.1}",
            outcome.load_time.as_secs_f64() * 1000.0
        ),
    );

    (headers, Json(outcome.snapshot)).into_response()
}

/// `(Cache-Control, CDN-Cache-Control)` for a loader result.
pub fn cache_directives(ttl: Option<u64>, shared: bool) -> (String, String) {
    match (ttl, shared) {
        (None, _) => (NO_STORE.to_string(), NO_STORE.to_string()),
        (Some(ttl), true) => {
            let value = format!("public, max-age={ttl}");
            (value.clone(), value)
        }
        (Some(ttl), false) => (format!("private, max-age={ttl}"), "no-store".to_string()),
    }
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_snapshots_are_public_on_both_layers() {
        let (browser, cdn) = cache_directives(Some(300), true);
        assert_eq!(browser, "public, max-age=300");
        assert_eq!(cdn, "public, max-age=300");
    }

    #[test]
    fn personalised_snapshots_skip_the_cdn() {
        let (browser, cdn) = cache_directives(Some(30), false);
        assert_eq!(browser, "private, max-age=30");
        assert_eq!(cdn, "no-store");
    }

    #[test]
    fn uncached_snapshots_are_never_stored() {
        let (browser, cdn) = cache_directives(None, true);
        assert_eq!(browser, "private, no-store");
        assert_eq!(cdn, "private, no-store");
    }
}
