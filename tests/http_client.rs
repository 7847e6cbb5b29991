//! Integration tests for the HTTP client against a local test server
//!
//! The server binds to a random port on localhost and counts hits per route.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use endpoint_cache::cache::{CacheConfig, CacheError, CachedClient, FetchError};
use endpoint_cache::{Client, Fetch};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct Counter {
    count: u32,
}

/// A test server serving a few fixed routes
struct Server {
    addr: SocketAddr,
    hits: Arc<AtomicU32>,
}

impl Server {
    async fn spawn() -> Self {
        let hits = Arc::new(AtomicU32::new(0));
        let router = Router::new()
            .route("/counter", get(counter))
            .route("/headers", get(echo_headers))
            .route("/broken", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }))
            .route("/garbage", get(|| async { "not json" }))
            .route(
                "/echo",
                axum::routing::post(|Json(body): Json<Value>| async move { Json(body) }),
            )
            .with_state(Arc::clone(&hits));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self { addr, hits }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn counter(State(hits): State<Arc<AtomicU32>>) -> Json<Value> {
    let count = hits.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "count": count }))
}

async fn echo_headers(headers: HeaderMap) -> Json<Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    Json(json!({
        "content_type": header("content-type"),
        "authorization": header("authorization"),
        "request_id": header("x-request-id"),
    }))
}

#[tokio::test]
async fn test_fetch_returns_body() {
    let server = Server::spawn().await;
    let client = Client::new(server.url());

    let body = client.fetch("/counter").await.unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["count"], 1);
}

#[tokio::test]
async fn test_fetch_rejects_non_ok_status() {
    let server = Server::spawn().await;
    let client = Client::new(server.url());

    let result = client.fetch("/broken").await;
    assert!(matches!(result, Err(FetchError::Status(status)) if status.as_u16() == 500));

    let result = client.fetch("/missing").await;
    assert!(matches!(result, Err(FetchError::Status(status)) if status.as_u16() == 404));
}

#[tokio::test]
async fn test_fetch_reports_connection_failure() {
    // Nothing listens on port 1
    let client = Client::builder("http://127.0.0.1:1")
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let result = client.fetch("/counter").await;
    assert!(matches!(result, Err(FetchError::RequestFailed(_))));
}

#[tokio::test]
async fn test_default_and_custom_headers_are_sent() {
    let server = Server::spawn().await;
    let client = Client::builder(server.url())
        .header("Authorization", "Bearer token")
        .build()
        .unwrap();

    let response = client
        .request(reqwest::Method::GET, "/headers")
        .header("X-Request-Id", "abc")
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["content_type"], "application/json");
    assert_eq!(body["authorization"], "Bearer token");
    assert_eq!(body["request_id"], "abc");
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let server = Server::spawn().await;
    let client = Client::new(server.url());

    let response = client.post("/echo", &json!({ "name": "test" })).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "test");
}

#[tokio::test]
async fn test_cached_client_over_http() {
    let server = Server::spawn().await;
    let cache = CachedClient::new(server.url());

    cache
        .register::<Counter>(CacheConfig::new("/counter", "@every 50ms", Duration::from_secs(60)))
        .await
        .unwrap();
    assert_eq!(server.hits(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    cache.stop();

    let latest = cache.read_cached::<Counter>("/counter").unwrap().into_fresh().unwrap();
    assert!(latest.count >= 4, "expected at least 3 background updates, got {}", latest.count);
    assert_eq!(cache.fetcher().base_url(), server.url());
}

#[tokio::test]
async fn test_cached_client_reports_decode_failure() {
    let server = Server::spawn().await;
    let cache = CachedClient::new(server.url());

    let result = cache
        .register::<Counter>(CacheConfig::new("/garbage", "@every 1h", Duration::from_secs(60)))
        .await;

    assert!(matches!(result, Err(CacheError::Decode { path, .. }) if path == "/garbage"));
}
