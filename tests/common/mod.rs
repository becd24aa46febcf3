// Shared helpers for the integration suites: drive the real router in
// memory mode through tower's oneshot, no sockets involved.
#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use doorman_gateway::state::AppState;

pub async fn test_state() -> AppState {
    AppState::for_tests().await
}

pub fn app(state: AppState) -> Router {
    doorman_gateway::create_router(state)
}

pub async fn body_json(response: Response<axum::body::Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn request_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

/// Session cookies + CSRF token from a successful admin login.
pub struct Session {
    pub cookie: String,
    pub csrf: String,
}

pub async fn login_admin(state: &AppState) -> Session {
    let response = app(state.clone())
        .oneshot(request_json(
            "POST",
            "/platform/authorization",
            json!({
                "email": "admin@doorman.dev",
                "password": "Password123!Password",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 200, "admin login failed");

    let cookies: Vec<String> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::to_string)
        .collect();
    let cookie = cookies.join("; ");

    let body = body_json(response).await;
    let csrf = body["response"]["csrf_token"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    Session { cookie, csrf }
}

/// Authenticated JSON request.
pub fn authed_json(session: &Session, method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .header(COOKIE, &session.cookie)
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

pub fn authed_get(session: &Session, uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(COOKIE, &session.cookie)
        .body(Body::empty())
        .unwrap()
}

pub fn authed_delete(session: &Session, uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header(COOKIE, &session.cookie)
        .body(Body::empty())
        .unwrap()
}

/// Onboard an API + endpoint and subscribe the admin to it.
pub async fn onboard_api(
    state: &AppState,
    session: &Session,
    api_name: &str,
    api_version: &str,
    servers: Vec<&str>,
    method: &str,
    uri: &str,
    extra: Value,
) {
    let mut payload = json!({
        "api_name": api_name,
        "api_version": api_version,
        "api_description": format!("{api_name} {api_version}"),
        "api_type": "REST",
        "api_servers": servers,
        "api_allowed_roles": ["admin"],
        "api_allowed_groups": ["ALL"],
        "api_allowed_retry_count": 0,
        "active": true,
    });
    if let (Some(obj), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            obj.insert(key.clone(), value.clone());
        }
    }

    let response = app(state.clone())
        .oneshot(authed_json(session, "POST", "/platform/api", payload))
        .await
        .unwrap();
    assert_eq!(response.status(), 201, "api onboarding failed");

    let response = app(state.clone())
        .oneshot(authed_json(
            session,
            "POST",
            "/platform/endpoint",
            json!({
                "api_name": api_name,
                "api_version": api_version,
                "endpoint_method": method,
                "endpoint_uri": uri,
                "endpoint_description": "test endpoint",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 201, "endpoint onboarding failed");

    let response = app(state.clone())
        .oneshot(authed_json(
            session,
            "POST",
            "/platform/subscription/subscribe",
            json!({
                "username": "admin",
                "api_name": api_name,
                "api_version": api_version,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 201, "subscription failed");
}

/// Spawn a local upstream that records the X-Request-ID it received and
/// echoes it back as X-Upstream-Request-ID.
pub async fn spawn_echo_upstream() -> (String, std::sync::Arc<std::sync::Mutex<Option<String>>>) {
    use axum::extract::State;
    use axum::http::HeaderMap;
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Option<String>>>;

    async fn echo(State(captured): State<Captured>, headers: HeaderMap) -> Response<Body> {
        let rid = headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        *captured.lock().unwrap() = Some(rid.clone());
        Response::builder()
            .header(CONTENT_TYPE, "application/json")
            .header("x-upstream-request-id", rid)
            .body(Body::from(r#"{"ok":true}"#))
            .unwrap()
    }

    let captured: Captured = Arc::new(Mutex::new(None));
    let upstream = Router::new()
        .route("/profile", axum::routing::get(echo))
        .with_state(Arc::clone(&captured));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, upstream).await.ok();
    });

    (format!("http://{addr}"), captured)
}

/// Spawn a local upstream serving a fixed JSON body on every route.
pub async fn spawn_json_upstream(body: Value) -> String {
    let upstream = Router::new().fallback(move || {
        let body = body.clone();
        async move { axum::Json(body) }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, upstream).await.ok();
    });

    format!("http://{addr}")
}
