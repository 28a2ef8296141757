mod support;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header::CACHE_CONTROL},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use atrium::cache::{
    BROADCAST_PATH, BroadcastConfig, BroadcastMessage, Broadcaster, CacheKey, CacheStore,
    InvalidationRequest, SECRET_HEADER,
};
use atrium::infra::http::api::{CDN_CACHE_CONTROL, USER_HEADER, X_CACHE};
use atrium::infra::http::build_router;

use support::{FailingStore, Harness};

fn router(harness: &Harness) -> Router {
    build_router(harness.app_state())
}

fn get(uri: &str, user: Option<Uuid>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

fn send_json(method: Method, uri: &str, user: Option<Uuid>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn call(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

fn header<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

#[tokio::test]
async fn anonymous_course_list_is_publicly_cacheable() {
    let harness = Harness::memory();
    let app = router(&harness);

    let (status, headers, body) = call(&app, get("/api/courses", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, CACHE_CONTROL), "public, max-age=300");
    assert_eq!(header(&headers, CDN_CACHE_CONTROL), "public, max-age=300");
    assert_eq!(header(&headers, X_CACHE), "miss");
    assert!(header(&headers, "server-timing").starts_with("loader;dur="));
    assert!(!header(&headers, "x-request-id").is_empty());
    assert_eq!(body["courses"].as_array().map(Vec::len), Some(2));
    assert!(body["enrollmentCounts"].is_object());

    let (_, headers, _) = call(&app, get("/api/courses", None)).await;
    assert_eq!(header(&headers, X_CACHE), "hit");
}

#[tokio::test]
async fn personalised_views_stay_private() {
    let harness = Harness::memory();
    let app = router(&harness);
    let student = harness.seed.student;

    let (status, headers, body) = call(&app, get("/api/courses", Some(student))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, CACHE_CONTROL), "private, max-age=30");
    assert_eq!(header(&headers, CDN_CACHE_CONTROL), "no-store");
    let course_a = harness.seed.course_a.to_string();
    assert!(body["enrollments"][course_a.as_str()].is_object());

    let (_, headers, body) = call(&app, get("/api/navbar", Some(student))).await;
    assert_eq!(header(&headers, CACHE_CONTROL), "private, max-age=30");
    assert_eq!(body["user"]["username"], "sam");
}

#[tokio::test]
async fn uncached_views_are_no_store() {
    let harness = Harness::memory();
    let app = router(&harness);

    let (status, headers, body) = call(&app, get("/api/navbar", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, CACHE_CONTROL), "private, no-store");
    assert_eq!(header(&headers, X_CACHE), "bypass");
    assert!(body["user"].is_null());

    let uri = format!("/api/checkout/{}", harness.seed.course_b);
    let (status, headers, body) = call(&app, get(&uri, Some(harness.seed.student))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, CDN_CACHE_CONTROL), "private, no-store");
    assert_eq!(body["alreadyEnrolled"], false);
}

#[tokio::test]
async fn checkout_without_identity_is_unauthorized() {
    let harness = Harness::memory();
    let app = router(&harness);

    let uri = format!("/api/checkout/{}", harness.seed.course_a);
    let (status, _, body) = call(&app, get(&uri, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _, _) = call(&app, get("/api/me/enrollments", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_ids_are_bad_requests() {
    let harness = Harness::memory();
    let app = router(&harness);

    let (status, _, body) = call(&app, get("/api/courses/not-a-uuid", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let request = Request::builder()
        .uri("/api/courses")
        .header(USER_HEADER, "someone")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["error"]["hint"]
            .as_str()
            .is_some_and(|hint| hint.contains(USER_HEADER))
    );
}

#[tokio::test]
async fn unknown_and_draft_courses_are_not_found() {
    let harness = Harness::memory();
    let app = router(&harness);

    let uri = format!("/api/courses/{}", Uuid::from_u128(0xbeef));
    let (status, _, body) = call(&app, get(&uri, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let draft = format!("/api/courses/{}", harness.seed.draft);
    let (status, _, _) = call(&app, get(&draft, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, headers, _) = call(&app, get(&draft, Some(harness.seed.instructor))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, CDN_CACHE_CONTROL), "no-store");
}

#[tokio::test]
async fn course_edit_by_instructor_invalidates_before_responding() {
    let harness = Harness::memory();
    let app = router(&harness);
    let seed = harness.seed;
    let detail = format!("/api/courses/{}", seed.course_a);

    call(&app, get(&detail, None)).await;
    let (_, headers, _) = call(&app, get(&detail, None)).await;
    assert_eq!(header(&headers, X_CACHE), "hit");

    let (status, _, body) = call(
        &app,
        send_json(
            Method::PATCH,
            &detail,
            Some(seed.instructor),
            json!({ "title": "Async Rust in Depth" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["course"]["title"], "Async Rust in Depth");
    assert!(body["invalidation"]["deleted"].as_u64().unwrap() >= 1);

    let (_, headers, body) = call(&app, get(&detail, None)).await;
    assert_eq!(header(&headers, X_CACHE), "miss");
    assert_eq!(body["course"]["title"], "Async Rust in Depth");
}

#[tokio::test]
async fn course_edit_by_other_user_is_forbidden() {
    let harness = Harness::memory();
    let app = router(&harness);
    let detail = format!("/api/courses/{}", harness.seed.course_a);

    let (status, _, body) = call(
        &app,
        send_json(
            Method::PATCH,
            &detail,
            Some(harness.seed.student),
            json!({ "title": "Mine now" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    let (status, _, _) = call(
        &app,
        send_json(Method::PATCH, &detail, None, json!({ "title": "Anyone" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_fields_in_edit_are_rejected() {
    let harness = Harness::memory();
    let app = router(&harness);
    let detail = format!("/api/courses/{}", harness.seed.course_a);

    let (status, _, _) = call(
        &app,
        send_json(
            Method::PATCH,
            &detail,
            Some(harness.seed.instructor),
            json!({ "instructorId": Uuid::nil() }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn enrollment_is_created_once() {
    let harness = Harness::memory();
    let app = router(&harness);
    let uri = format!("/api/courses/{}/enrollments", harness.seed.course_b);
    let student = Some(harness.seed.student);

    let (status, _, body) = call(&app, send_json(Method::POST, &uri, student, json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"], true);

    let (status, _, body) = call(&app, send_json(Method::POST, &uri, student, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], false);
    assert!(body["invalidation"].is_null());
}

#[tokio::test]
async fn review_with_bad_rating_is_invalid_input() {
    let harness = Harness::memory();
    let app = router(&harness);
    let uri = format!("/api/courses/{}/reviews", harness.seed.course_a);

    let (status, _, body) = call(
        &app,
        send_json(
            Method::POST,
            &uri,
            Some(harness.seed.student),
            json!({ "rating": 9, "body": "!" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_input");

    let (status, _, body) = call(
        &app,
        send_json(
            Method::POST,
            &uri,
            Some(harness.seed.student),
            json!({ "rating": 5, "body": "Loved it" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["review"]["rating"], 5);
}

#[tokio::test]
async fn first_view_is_reported() {
    let harness = Harness::memory();
    let app = router(&harness);
    let uri = format!("/api/courses/{}/views", harness.seed.course_a);
    let student = Some(harness.seed.student);

    let (status, _, body) = call(&app, send_json(Method::POST, &uri, student, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["firstView"], true);
    assert_eq!(body["viewCount"], 1);

    let (_, _, body) = call(&app, send_json(Method::POST, &uri, student, json!({}))).await;
    assert_eq!(body["firstView"], false);
}

#[tokio::test]
async fn database_outage_is_service_unavailable() {
    let harness = Harness::memory();
    let app = router(&harness);
    harness.repos.set_unavailable(true);

    let uri = format!("/api/courses/{}/stats", harness.seed.course_a);
    let (status, _, body) = call(&app, get(&uri, None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "db_timeout");

    let (status, _, _) = call(&app, get("/_health/db", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn health_endpoints_report_each_dependency() {
    let healthy = Harness::memory();
    let (status, _, _) = call(&router(&healthy), get("/_health/db", None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = call(&router(&healthy), get("/_health/cache", None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let degraded = Harness::new(Arc::new(FailingStore::default()));
    let app = router(&degraded);
    let (status, _, _) = call(&app, get("/_health/cache", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, headers, _) = call(&app, get("/api/courses", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, X_CACHE), "miss");
}

#[tokio::test]
async fn request_id_is_echoed() {
    let harness = Harness::memory();
    let request = Request::builder()
        .uri("/api/courses")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();

    let (_, headers, _) = call(&router(&harness), request).await;
    assert_eq!(header(&headers, "x-request-id"), "req-42");
}

fn broadcast_request(secret: Option<&str>, message: &BroadcastMessage) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(BROADCAST_PATH)
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header(SECRET_HEADER, secret);
    }
    builder
        .body(Body::from(serde_json::to_vec(message).unwrap()))
        .unwrap()
}

fn secured_router(harness: &Harness, instance_id: &str) -> Router {
    let broadcaster = Broadcaster::new(BroadcastConfig {
        secret: Some("s3cret".to_string()),
        instance_id: instance_id.to_string(),
        ..BroadcastConfig::default()
    })
    .unwrap();
    let mut state = harness.app_state();
    state.invalidator = state.invalidator.with_broadcaster(Arc::new(broadcaster));
    build_router(state)
}

#[tokio::test]
async fn broadcast_receiver_checks_the_shared_secret() {
    let harness = Harness::memory();
    let course_a = harness.seed.course_a;
    harness.loader.course_stats(course_a).await.unwrap();
    let app = secured_router(&harness, "self");
    let message = BroadcastMessage::from_request(&InvalidationRequest::course(course_a), "peer");

    let (status, _, _) = call(&app, broadcast_request(None, &message)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _, _) = call(&app, broadcast_request(Some("wrong"), &message)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let stats_key = CacheKey::course_stats(course_a).render();
    assert!(harness.store.exists(&stats_key).await.unwrap());

    let (status, _, body) = call(&app, broadcast_request(Some("s3cret"), &message)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["deleted"], 1);
    assert!(!harness.store.exists(&stats_key).await.unwrap());
}

#[tokio::test]
async fn broadcast_receiver_ignores_own_messages() {
    let harness = Harness::memory();
    let course_a = harness.seed.course_a;
    harness.loader.course_stats(course_a).await.unwrap();
    let app = secured_router(&harness, "self");
    let message = BroadcastMessage::from_request(&InvalidationRequest::course(course_a), "self");

    let (status, _, _) = call(&app, broadcast_request(Some("s3cret"), &message)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let stats_key = CacheKey::course_stats(course_a).render();
    assert!(harness.store.exists(&stats_key).await.unwrap());
}
