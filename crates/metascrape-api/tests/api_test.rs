//! Router-level tests against the in-memory backend.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use metascrape_api::auth::JwtConfig;
use metascrape_api::{build_router, AppState};
use metascrape_core::{
    ExtractionResult, ItemOutcome, JobQueue, ResultRepository, StatusTracker,
};
use metascrape_db::InMemoryStore;

const BOUNDARY: &str = "metascrape-test-boundary";

fn app(store: Arc<InMemoryStore>) -> Router {
    let state = AppState::from_store(store, JwtConfig::new("test-secret"));
    build_router(state, 1024 * 1024)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value, axum::http::HeaderMap) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body, headers)
}

fn register_request(username: &str, password: &str) -> Request<Body> {
    Request::post("/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({ "username": username, "password": password }).to_string(),
        ))
        .unwrap()
}

fn token_request(username: &str, password: &str) -> Request<Body> {
    Request::post("/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!("username={username}&password={password}")))
        .unwrap()
}

fn upload_request(token: Option<&str>, contents: &str) -> Request<Body> {
    let body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"urls.csv\"\r\n\
         Content-Type: text/csv\r\n\r\n\
         {contents}\r\n\
         --{BOUNDARY}--\r\n"
    );
    let mut builder = Request::post("/upload").header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

fn authed_get(uri: &str, token: &str) -> Request<Body> {
    Request::get(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

/// Register `alice` and return a fresh access token.
async fn login(app: &Router) -> String {
    let (status, _, _) = send(app, register_request("alice", "correct-horse")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body, _) = send(app, token_request("alice", "correct-horse")).await;
    assert_eq!(status, StatusCode::OK);
    body["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = app(Arc::new(InMemoryStore::new()));
    let (status, body, headers) = send(
        &app,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_register_then_token() {
    let app = app(Arc::new(InMemoryStore::new()));

    let (status, body, _) = send(&app, register_request("alice", "correct-horse")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert!(body["id"].is_string());
    assert!(body.get("hashed_password").is_none());

    let (status, body, _) = send(&app, token_request("alice", "correct-horse")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "bearer");
    assert!(!body["access_token"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_logins_all_succeed() {
    let app = app(Arc::new(InMemoryStore::new()));
    let (status, _, _) = send(&app, register_request("alice", "correct-horse")).await;
    assert_eq!(status, StatusCode::OK);

    let mut logins = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let app = app.clone();
        logins.spawn(async move { send(&app, token_request("alice", "correct-horse")).await });
    }
    let (status, _, _) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let mut issued = 0;
    while let Some(joined) = logins.join_next().await {
        let (status, body, _) = joined.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(body["access_token"].is_string());
        issued += 1;
    }
    assert_eq!(issued, 4);
}

#[tokio::test]
async fn test_register_rejects_duplicate_and_blank() {
    let app = app(Arc::new(InMemoryStore::new()));

    let (status, _, _) = send(&app, register_request("alice", "correct-horse")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body, _) = send(&app, register_request("alice", "another-pass")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Username already registered");

    let (status, _, _) = send(&app, register_request("  ", "correct-horse")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app, register_request("bob", "short")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_token_rejects_bad_credentials() {
    let app = app(Arc::new(InMemoryStore::new()));
    send(&app, register_request("alice", "correct-horse")).await;

    let (status, body, _) = send(&app, token_request("alice", "wrong-password")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Incorrect username or password");

    let (status, body, _) = send(&app, token_request("mallory", "correct-horse")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Incorrect username or password");
}

#[tokio::test]
async fn test_upload_requires_token() {
    let app = app(Arc::new(InMemoryStore::new()));

    let (status, body, headers) = send(&app, upload_request(None, "https://a.test")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Not authenticated");
    assert_eq!(headers[header::WWW_AUTHENTICATE], "Bearer");

    let (status, body, _) =
        send(&app, upload_request(Some("not-a-token"), "https://a.test")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Could not validate credentials");
}

#[tokio::test]
async fn test_token_for_deleted_or_foreign_user_is_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let app = app(store);

    // Validly signed, but the account was never registered.
    let token =
        metascrape_api::auth::generate_access_token("ghost", &JwtConfig::new("test-secret"))
            .unwrap();
    let (status, _, _) = send(&app, upload_request(Some(&token), "https://a.test")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Registered, but signed with another secret.
    send(&app, register_request("alice", "correct-horse")).await;
    let forged =
        metascrape_api::auth::generate_access_token("alice", &JwtConfig::new("other-secret"))
            .unwrap();
    let (status, _, _) = send(&app, upload_request(Some(&forged), "https://a.test")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_upload_creates_pending_job() {
    let store = Arc::new(InMemoryStore::new());
    let app = app(store.clone());
    let token = login(&app).await;

    let csv = "https://a.test,extra column\r\n\r\n\"https://b.test\"\r\n";
    let (status, body, _) = send(&app, upload_request(Some(&token), csv)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Scraping started.");
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let (status, body, _) = send(&app, authed_get(&format!("/status/{task_id}"), &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task_id"], task_id.as_str());
    assert_eq!(body["status"], "pending");
    assert_eq!(body["total_items"], 2);
    assert_eq!(body["processed_items"], 0);
    assert_eq!(body["extraction_errors"], 0);

    assert_eq!(store.queued_count().await.unwrap(), 2);
    let first = store.dequeue().await.unwrap().unwrap();
    assert_eq!(first.url, "https://a.test");
    let second = store.dequeue().await.unwrap().unwrap();
    assert_eq!(second.url, "https://b.test");
}

#[tokio::test]
async fn test_upload_keeps_comma_inside_quoted_url() {
    let store = Arc::new(InMemoryStore::new());
    let app = app(store.clone());
    let token = login(&app).await;

    let csv = "\"https://a.test/search?q=1,2\",label\n";
    let (status, _, _) = send(&app, upload_request(Some(&token), csv)).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(store.queued_count().await.unwrap(), 1);
    let item = store.dequeue().await.unwrap().unwrap();
    assert_eq!(item.url, "https://a.test/search?q=1,2");
}

#[tokio::test]
async fn test_upload_of_empty_file_completes_immediately() {
    let app = app(Arc::new(InMemoryStore::new()));
    let token = login(&app).await;

    let (status, body, _) = send(&app, upload_request(Some(&token), "")).await;
    assert_eq!(status, StatusCode::OK);
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let (status, body, _) = send(&app, authed_get(&format!("/status/{task_id}"), &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "complete");
    assert_eq!(body["total_items"], 0);
}

#[tokio::test]
async fn test_upload_without_file_field_is_rejected() {
    let app = app(Arc::new(InMemoryStore::new()));
    let token = login(&app).await;

    let body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"other\"\r\n\r\n\
         https://a.test\r\n\
         --{BOUNDARY}--\r\n"
    );
    let request = Request::post("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body))
        .unwrap();
    let (status, body, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing file field");
}

#[tokio::test]
async fn test_status_of_unknown_or_malformed_task() {
    let app = app(Arc::new(InMemoryStore::new()));
    let token = login(&app).await;

    let unknown = uuid::Uuid::now_v7();
    let (status, body, _) = send(&app, authed_get(&format!("/status/{unknown}"), &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Task not found");

    let (status, _, _) = send(&app, authed_get("/status/not-a-uuid", &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_of_failed_job_reports_error() {
    let store = Arc::new(InMemoryStore::new());
    let app = app(store.clone());
    let token = login(&app).await;

    let job_id = store
        .submit(vec!["https://a.test".into(), "https://b.test".into()], Some("alice"))
        .await
        .unwrap();
    let item = store.dequeue().await.unwrap().unwrap();
    store
        .report(&item, &ItemOutcome::StorageFailed("disk full".into()))
        .await
        .unwrap();

    let (status, body, _) = send(&app, authed_get(&format!("/status/{job_id}"), &token)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["task_id"], job_id.to_string());
    assert_eq!(body["status"], "failed");
    assert_eq!(body["retry"], false);
    assert!(body["error"].as_str().unwrap().contains("disk full"));
}

#[tokio::test]
async fn test_results_lookup() {
    let store = Arc::new(InMemoryStore::new());
    let app = app(store.clone());
    let token = login(&app).await;

    let job_id = uuid::Uuid::now_v7();
    store
        .upsert(
            job_id,
            &ExtractionResult::success("https://a.test/page", "A", "About A", "a, b"),
        )
        .await
        .unwrap();

    let (status, body, _) = send(
        &app,
        authed_get("/results?url=https%3A%2F%2Fa.test%2Fpage", &token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://a.test/page");
    assert_eq!(body["title"], "A");
    assert_eq!(body["description"], "About A");
    assert_eq!(body["keywords"], "a, b");
    assert!(body["error"].is_null());

    let (status, body, _) = send(
        &app,
        authed_get("/results?url=https%3A%2F%2Fmissing.test", &token),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "No results for this URL");
}

#[tokio::test]
async fn test_results_require_token() {
    let app = app(Arc::new(InMemoryStore::new()));
    let (status, _, _) = send(
        &app,
        Request::get("/results?url=https%3A%2F%2Fa.test")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let state = AppState::from_store(store, JwtConfig::new("test-secret"));
    let app = build_router(state, 64);
    let token = login(&app).await;

    let csv = "https://a.test\n".repeat(32);
    let response = app
        .clone()
        .oneshot(upload_request(Some(&token), &csv))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}
