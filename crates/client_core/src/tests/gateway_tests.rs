use super::*;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use shared::domain::{UserId, UserProfile};
use tokio::net::TcpListener;

use crate::session_store::EphemeralCredentialStore;

fn fixture_user() -> UserProfile {
    UserProfile {
        id: UserId(7),
        username: "editor".to_string(),
        email: "editor@empresa.com.br".to_string(),
        first_name: "Beatriz".to_string(),
        last_name: "Costa".to_string(),
        role: "editor".to_string(),
        is_active: true,
        last_login: None,
    }
}

async fn handle_plain() -> (StatusCode, &'static str) {
    (StatusCode::OK, "this is not json")
}

async fn handle_broken() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "stack trace goes here")
}

async fn handle_teapot() -> (StatusCode, Json<ErrorBody>) {
    (StatusCode::IM_A_TEAPOT, Json(ErrorBody::new("short and stout")))
}

async fn handle_private() -> (StatusCode, Json<ErrorBody>) {
    (StatusCode::UNAUTHORIZED, Json(ErrorBody::new("missing token")))
}

async fn handle_echo(method: Method, headers: HeaderMap, body: String) -> Json<serde_json::Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
    };
    Json(json!({
        "method": method.as_str(),
        "authorization": header("authorization"),
        "content_type": header("content-type"),
        "x_custom": header("x-custom"),
        "body": body,
    }))
}

async fn spawn_api_server() -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route("/plain", get(handle_plain))
        .route("/broken", get(handle_broken))
        .route("/teapot", get(handle_teapot))
        .route("/private", get(handle_private))
        .route("/echo", get(handle_echo).post(handle_echo));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn gateway_with_store(base_url: &str) -> (ApiGateway, Arc<SessionStore>) {
    let store = SessionStore::new(EphemeralCredentialStore::new());
    let gateway = ApiGateway::new(base_url, Arc::clone(&store));
    (gateway, store)
}

#[test]
fn trailing_slashes_are_trimmed_from_the_base_url() {
    let store = SessionStore::new(EphemeralCredentialStore::new());
    let gateway = ApiGateway::new("http://localhost:5000/api///", store);
    assert_eq!(gateway.base_url(), "http://localhost:5000/api");
}

#[tokio::test]
async fn non_json_success_body_is_a_malformed_response() {
    let base_url = spawn_api_server().await;
    let (gateway, _) = gateway_with_store(&base_url);

    let err = gateway.get::<Value>("/plain").await.expect_err("must fail");

    match err {
        GatewayError::Api { status, message } => {
            assert_eq!(status, 200);
            assert_eq!(message, "malformed response body");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unparseable_error_body_falls_back_to_the_generic_message() {
    let base_url = spawn_api_server().await;
    let (gateway, _) = gateway_with_store(&base_url);

    let err = gateway.get::<Value>("/broken").await.expect_err("must fail");

    match err {
        GatewayError::Api { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, GENERIC_REQUEST_FAILED);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn server_supplied_error_message_is_preserved() {
    let base_url = spawn_api_server().await;
    let (gateway, _) = gateway_with_store(&base_url);

    let err = gateway.get::<Value>("/teapot").await.expect_err("must fail");

    match err {
        GatewayError::Api { status, message } => {
            assert_eq!(status, 418);
            assert_eq!(message, "short and stout");
            assert_eq!(err_status(status), Some(418));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

fn err_status(status: u16) -> Option<u16> {
    GatewayError::Api {
        status,
        message: String::new(),
    }
    .status()
}

#[tokio::test]
async fn unauthenticated_401_is_a_plain_api_error() {
    let base_url = spawn_api_server().await;
    let (gateway, store) = gateway_with_store(&base_url);

    let err = gateway.get::<Value>("/private").await.expect_err("must fail");

    match err {
        GatewayError::Api { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "missing token");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // No token was attached, so there was nothing to invalidate.
    assert!(store.get().await.token.is_none());
}

#[tokio::test]
async fn authenticated_401_clears_the_store_and_maps_to_session_expired() {
    let base_url = spawn_api_server().await;
    let (gateway, store) = gateway_with_store(&base_url);
    store.set("tok9".to_string(), fixture_user()).await;

    let err = gateway.get::<Value>("/private").await.expect_err("must fail");

    assert!(matches!(err, GatewayError::SessionExpired));
    assert_eq!(err.status(), Some(401));
    let snapshot = store.get().await;
    assert!(snapshot.token.is_none());
    assert!(snapshot.user.is_none());
    assert!(store.load_persisted().await.expect("load").is_none());
}

#[tokio::test]
async fn default_headers_carry_bearer_token_and_json_content_type() {
    let base_url = spawn_api_server().await;
    let (gateway, store) = gateway_with_store(&base_url);
    store.set("tok9".to_string(), fixture_user()).await;

    let echoed = gateway
        .request("/echo", RequestOptions::default())
        .await
        .expect("echo");

    assert_eq!(echoed["method"], "GET");
    assert_eq!(echoed["authorization"], "Bearer tok9");
    assert_eq!(echoed["content_type"], "application/json");
    assert_eq!(echoed["x_custom"], Value::Null);
}

#[tokio::test]
async fn caller_headers_override_the_defaults() {
    let base_url = spawn_api_server().await;
    let (gateway, _) = gateway_with_store(&base_url);

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/vnd.dashboard+json"),
    );
    headers.insert("x-custom", HeaderValue::from_static("1"));
    let options = RequestOptions {
        method: Method::POST,
        body: Some(json!({"total": 42})),
        headers,
    };

    let echoed = gateway.request("/echo", options).await.expect("echo");

    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["content_type"], "application/vnd.dashboard+json");
    assert_eq!(echoed["x_custom"], "1");
    let body: Value =
        serde_json::from_str(echoed["body"].as_str().expect("body")).expect("body json");
    assert_eq!(body, json!({"total": 42}));
}

#[tokio::test]
async fn unreachable_server_yields_a_network_error() {
    let (gateway, _) = gateway_with_store("http://127.0.0.1:9");

    let err = gateway.get::<Value>("/plain").await.expect_err("must fail");

    assert!(matches!(err, GatewayError::Network { .. }));
    assert_eq!(err.status(), None);
}
