mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use common::{MockRepo, create_test_state, create_test_state_with_quotas};
use news_portal::{create_router, ratelimit::Quota};
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;

fn app(repo: &MockRepo) -> Router {
    create_router(create_test_state(repo))
}

fn tight(capacity: u32) -> Quota {
    Quota {
        capacity,
        refill_per_interval: f64::from(capacity),
        interval: Duration::from_secs(60),
    }
}

fn get(uri: &str, client: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .unwrap()
}

fn as_user(method: &str, uri: &str, user_id: i64, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "10.0.0.1")
        .header("x-user-id", user_id.to_string())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn header_str<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

// --- Plumbing ---

#[tokio::test]
async fn test_health_check_carries_rate_limit_and_request_id_headers() {
    let repo = MockRepo::new();
    let response = app(&repo).oneshot(get("/health", "10.0.0.1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-rate-limit-remaining"), Some("99"));
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let repo = MockRepo::new();
    let response = app(&repo)
        .oneshot(get("/api-docs/openapi.json", "10.0.0.1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let doc = json_body(response).await;
    assert!(doc["paths"]["/api/admin/news/bulk"]["post"].is_object());
}

// --- Throttling ---

#[tokio::test]
async fn test_exhausted_client_gets_429_without_reaching_handler() {
    let repo = MockRepo::new().with_news(1, 7, true, &[]);
    let router = create_router(create_test_state_with_quotas(&repo, tight(2), tight(2)));

    for expected_remaining in ["1", "0"] {
        let ok = router.clone().oneshot(get("/api/public/news", "10.0.0.9")).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(header_str(&ok, "x-rate-limit-remaining"), Some(expected_remaining));
    }

    let throttled = router.clone().oneshot(get("/api/public/news", "10.0.0.9")).await.unwrap();
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);
    // One token per 30s at 2/min.
    assert_eq!(header_str(&throttled, "retry-after"), Some("30"));
    assert_eq!(header_str(&throttled, "x-rate-limit-remaining"), Some("0"));

    let body = json_body(throttled).await;
    assert_eq!(
        body,
        json!({
            "status": 429,
            "error": "too_many_requests",
            "message": "Rate limit exceeded",
            "retry_after": 30
        })
    );
    assert_eq!(repo.count("find_published"), 2);

    // A different client is unaffected.
    let other = router.oneshot(get("/api/public/news", "10.0.0.10")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_paths_draw_from_their_own_quota() {
    let repo = MockRepo::new().with_user(1, &["ADMIN"]);
    let router = create_router(create_test_state_with_quotas(&repo, tight(1), tight(1)));

    let public = router.clone().oneshot(get("/health", "10.0.0.1")).await.unwrap();
    assert_eq!(public.status(), StatusCode::OK);
    let public = router.clone().oneshot(get("/health", "10.0.0.1")).await.unwrap();
    assert_eq!(public.status(), StatusCode::TOO_MANY_REQUESTS);

    let admin = router
        .clone()
        .oneshot(as_user("GET", "/api/admin/me", 1, Value::Null))
        .await
        .unwrap();
    assert_eq!(admin.status(), StatusCode::OK);

    let admin = router
        .oneshot(as_user("GET", "/api/admin/me", 1, Value::Null))
        .await
        .unwrap();
    assert_eq!(admin.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_throttling_precedes_authentication() {
    let repo = MockRepo::new();
    let router = create_router(create_test_state_with_quotas(&repo, tight(1), tight(1)));

    let first = router.clone().oneshot(get("/api/admin/me", "10.0.0.1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::UNAUTHORIZED);

    let second = router.oneshot(get("/api/admin/me", "10.0.0.1")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

// --- Authentication and authorization over HTTP ---

#[tokio::test]
async fn test_admin_routes_require_authentication() {
    let repo = MockRepo::new();
    let response = app(&repo).oneshot(get("/api/admin/news", "10.0.0.1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_me_over_local_bypass() {
    let repo = MockRepo::new().with_user(3, &["ROLE_EDITOR"]);
    let response = app(&repo)
        .oneshot(as_user("GET", "/api/admin/me", 3, Value::Null))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "id": 3, "roles": ["EDITOR"] }));
    // The admin layer resolves the principal once for both middleware and handler.
    assert_eq!(repo.count("find_user"), 1);
}

#[tokio::test]
async fn test_bulk_over_http_maps_errors_to_statuses() {
    let repo = MockRepo::new()
        .with_user(1, &["ADMIN"])
        .with_user(2, &["EDITOR"])
        .with_news(10, 2, true, &[]);
    let router = app(&repo);

    let editor = router
        .clone()
        .oneshot(as_user(
            "POST",
            "/api/admin/news/bulk",
            2,
            json!({ "action": "UNPUBLISH", "filterType": "ALL", "confirmed": true }),
        ))
        .await
        .unwrap();
    assert_eq!(editor.status(), StatusCode::FORBIDDEN);

    let unconfirmed = router
        .clone()
        .oneshot(as_user(
            "POST",
            "/api/admin/news/bulk",
            1,
            json!({ "action": "DELETE", "filterType": "BY_IDS", "itemIds": [10] }),
        ))
        .await
        .unwrap();
    assert_eq!(unconfirmed.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(unconfirmed).await["error"], "invalid_input");

    let unsupported = router
        .clone()
        .oneshot(as_user(
            "POST",
            "/api/admin/news/bulk",
            1,
            json!({ "action": "ARCHIVE", "filterType": "BY_IDS", "itemIds": [10], "confirmed": true }),
        ))
        .await
        .unwrap();
    assert_eq!(unsupported.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(unsupported).await["error"], "unsupported_operation");

    let applied = router
        .oneshot(as_user(
            "POST",
            "/api/admin/news/bulk",
            1,
            json!({ "action": "DELETE", "filterType": "BY_IDS", "itemIds": [10], "confirmed": true }),
        ))
        .await
        .unwrap();
    assert_eq!(applied.status(), StatusCode::OK);
    assert_eq!(json_body(applied).await, json!({ "affectedCount": 1 }));
    assert!(repo.get(10).is_none());
}

#[tokio::test]
async fn test_malformed_bulk_body_is_invalid_input() {
    let repo = MockRepo::new().with_user(1, &["ADMIN"]).with_news(10, 1, true, &[]);
    let router = app(&repo);

    let bodies = [
        json!({ "filterType": "ALL", "confirmed": true }),
        json!({ "action": "DELETE", "confirmed": true }),
        json!({ "action": "DELETE", "filterType": "ALL", "confirmed": "yes" }),
        json!({ "action": "DELETE", "filterType": "BY_IDS", "itemIds": "10", "confirmed": true }),
    ];

    for body in bodies {
        let response = router
            .clone()
            .oneshot(as_user("POST", "/api/admin/news/bulk", 1, body.clone()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
        let payload = json_body(response).await;
        assert_eq!(payload["status"], 400);
        assert_eq!(payload["error"], "invalid_input");
        assert!(payload["message"].as_str().is_some_and(|m| !m.is_empty()));
    }

    assert_eq!(repo.count("begin_bulk"), 0);
    assert_eq!(repo.news_ids(), vec![10]);
}

#[tokio::test]
async fn test_unparseable_news_body_is_invalid_input() {
    let repo = MockRepo::new().with_user(1, &["ADMIN"]);

    let request = Request::builder()
        .method("POST")
        .uri("/api/admin/news")
        .header("x-forwarded-for", "10.0.0.1")
        .header("x-user-id", "1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"title\": "))
        .unwrap();
    let response = app(&repo).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_input");
    assert_eq!(repo.count("create"), 0);
}

#[tokio::test]
async fn test_foreign_editor_gets_403_on_put() {
    let repo = MockRepo::new()
        .with_user(2, &["EDITOR"])
        .with_user(3, &["EDITOR"])
        .with_news(10, 2, true, &[]);

    let response = app(&repo)
        .oneshot(as_user("PUT", "/api/admin/news/10", 3, json!({ "title": "mine now" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(repo.get(10).unwrap().title, "Article 10");
}
