use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use keyrun_adapters::{AuthError, AuthRetryPolicy, Authenticator, ClientCredentialsAuthenticator};
use serde_json::json;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Calls(Arc<AtomicUsize>);

async fn issue(State(calls): State<Calls>, headers: HeaderMap, body: String) -> impl IntoResponse {
    let n = calls.0.fetch_add(1, Ordering::SeqCst) + 1;
    if !headers.contains_key("authorization") || body != "grant_type=client_credentials" {
        return StatusCode::BAD_REQUEST.into_response();
    }
    Json(json!({"access_token": format!("token-{n}"), "token_type": "bearer", "expires_in": 86399}))
        .into_response()
}

async fn flaky(State(calls): State<Calls>) -> impl IntoResponse {
    let n = calls.0.fetch_add(1, Ordering::SeqCst) + 1;
    if n < 3 {
        return StatusCode::BAD_GATEWAY.into_response();
    }
    Json(json!({"access_token": "eventually", "expires_in": 3600})).into_response()
}

async fn down(State(calls): State<Calls>) -> StatusCode {
    calls.0.fetch_add(1, Ordering::SeqCst);
    StatusCode::SERVICE_UNAVAILABLE
}

async fn denied(State(calls): State<Calls>) -> StatusCode {
    calls.0.fetch_add(1, Ordering::SeqCst);
    StatusCode::UNAUTHORIZED
}

async fn garbage() -> &'static str {
    "not json"
}

async fn serve(calls: Calls) -> String {
    let app = Router::new()
        .route("/token", post(issue))
        .route("/flaky", post(flaky))
        .route("/down", post(down))
        .route("/denied", post(denied))
        .route("/garbage", post(garbage))
        .with_state(calls);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn authenticator(url: String) -> ClientCredentialsAuthenticator {
    ClientCredentialsAuthenticator::new(reqwest::Client::new(), url, "id", "secret").with_policy(
        AuthRetryPolicy {
            attempts: 5,
            spacing: Duration::from_millis(10),
        },
    )
}

#[tokio::test]
async fn token_is_cached_until_invalidated() {
    let calls = Calls::default();
    let base = serve(calls.clone()).await;
    let auth = authenticator(format!("{base}/token"));

    assert_eq!(auth.get_token().await.unwrap().as_str(), "token-1");
    assert_eq!(auth.get_token().await.unwrap().as_str(), "token-1");
    assert_eq!(calls.0.load(Ordering::SeqCst), 1);

    auth.invalidate().await;
    assert_eq!(auth.get_token().await.unwrap().as_str(), "token-2");
}

#[tokio::test]
async fn server_errors_are_retried() {
    let calls = Calls::default();
    let base = serve(calls.clone()).await;
    let auth = authenticator(format!("{base}/flaky"));

    assert_eq!(auth.get_token().await.unwrap().as_str(), "eventually");
    assert_eq!(calls.0.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unreachable_after_bounded_attempts() {
    let calls = Calls::default();
    let base = serve(calls.clone()).await;
    let auth = authenticator(format!("{base}/down"));

    let err = auth.get_token().await.unwrap_err();
    assert!(matches!(err, AuthError::Unreachable { attempts: 5, .. }), "{err}");
    assert_eq!(calls.0.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let calls = Calls::default();
    let base = serve(calls.clone()).await;
    let auth = authenticator(format!("{base}/denied"));

    let err = auth.get_token().await.unwrap_err();
    assert!(matches!(err, AuthError::Rejected { status: 401 }), "{err}");
    assert_eq!(calls.0.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn undecodable_token_body() {
    let base = serve(Calls::default()).await;
    let auth = authenticator(format!("{base}/garbage"));
    assert!(matches!(
        auth.get_token().await,
        Err(AuthError::MalformedResponse(_))
    ));
}
