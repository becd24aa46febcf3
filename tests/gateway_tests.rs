mod common;

use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

use common::*;

// ═══════════════════════════════════════════════════════════════════════════
//  REST dispatcher
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn rest_happy_path_propagates_request_id() {
    let state = test_state().await;
    let session = login_admin(&state).await;
    let (upstream_url, captured) = spawn_echo_upstream().await;

    onboard_api(
        &state,
        &session,
        "customer",
        "v1",
        vec![upstream_url.as_str()],
        "GET",
        "/profile",
        json!({"api_allowed_headers": ["X-Upstream-Request-ID"]}),
    )
    .await;

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/api/rest/customer/v1/profile"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response_rid = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("missing X-Request-ID on response");
    let upstream_echo = response
        .headers()
        .get("x-upstream-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("upstream header not passed through");
    let upstream_rid = captured.lock().unwrap().clone().expect("upstream never called");

    assert_eq!(upstream_rid, response_rid);
    assert_eq!(upstream_echo, response_rid);

    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn missing_api_returns_404_with_gateway_code() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/api/rest/nope/v1/x"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    let code = body["error_code"].as_str().unwrap();
    assert!(
        ["GTW001", "GTW002", "GTW003"].contains(&code),
        "unexpected error code {code}"
    );
}

#[tokio::test]
async fn missing_endpoint_returns_gtw001() {
    let state = test_state().await;
    let session = login_admin(&state).await;
    let upstream = spawn_json_upstream(json!({"ok": true})).await;

    onboard_api(
        &state,
        &session,
        "partial",
        "v1",
        vec![upstream.as_str()],
        "GET",
        "/known",
        json!({}),
    )
    .await;

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/api/rest/partial/v1/unknown"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error_code"], "GTW001");
}

#[tokio::test]
async fn unsubscribed_user_gets_gtw002() {
    let state = test_state().await;
    let session = login_admin(&state).await;
    let upstream = spawn_json_upstream(json!({"ok": true})).await;

    // Onboard without subscribing.
    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/api",
            json!({
                "api_name": "closed",
                "api_version": "v1",
                "api_type": "REST",
                "api_servers": [upstream],
                "active": true,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/endpoint",
            json!({
                "api_name": "closed",
                "api_version": "v1",
                "endpoint_method": "GET",
                "endpoint_uri": "/x",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/api/rest/closed/v1/x"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error_code"], "GTW002");
}

#[tokio::test]
async fn dead_upstream_exhausts_retries_with_gtw006() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    onboard_api(
        &state,
        &session,
        "deadend",
        "v1",
        vec!["http://127.0.0.1:9"],
        "GET",
        "/x",
        json!({"api_allowed_retry_count": 1}),
    )
    .await;

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/api/rest/deadend/v1/x"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["error_code"], "GTW006");
}

#[tokio::test]
async fn public_api_bypasses_auth_and_subscription() {
    let state = test_state().await;
    let session = login_admin(&state).await;
    let upstream = spawn_json_upstream(json!({"public": true})).await;

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/api",
            json!({
                "api_name": "open",
                "api_version": "v1",
                "api_type": "REST",
                "api_servers": [upstream],
                "api_public": true,
                "active": true,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/endpoint",
            json!({
                "api_name": "open",
                "api_version": "v1",
                "endpoint_method": "GET",
                "endpoint_uri": "/data",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // No cookie at all.
    let response = app(state.clone())
        .oneshot(get("/api/rest/open/v1/data"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["public"], true);
}

#[tokio::test]
async fn endpoint_validation_schema_rejects_bad_bodies() {
    let state = test_state().await;
    let session = login_admin(&state).await;
    let upstream = spawn_json_upstream(json!({"ok": true})).await;

    onboard_api(
        &state,
        &session,
        "strict",
        "v1",
        vec![upstream.as_str()],
        "POST",
        "/orders",
        json!({}),
    )
    .await;
    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "PUT",
            "/platform/endpoint/POST/strict/v1/orders",
            json!({"validation_schema": {"quantity": {"type": "integer", "required": true, "min": 1}}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/api/rest/strict/v1/orders",
            json!({"quantity": 0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error_code"], "VAL001");
    assert!(body["error_message"].as_str().unwrap().contains("quantity"));

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/api/rest/strict/v1/orders",
            json!({"quantity": 2}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ═══════════════════════════════════════════════════════════════════════════
//  GraphQL dispatcher
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn graphql_requires_version_header() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/api/graphql/gql",
            json!({"query": "{ hero { name } }"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_code"], "GTW004");
}

#[tokio::test]
async fn graphql_errors_array_passes_through_with_200() {
    let state = test_state().await;
    let session = login_admin(&state).await;
    let upstream = spawn_json_upstream(json!({"errors": [{"message": "boom"}]})).await;

    onboard_api(
        &state,
        &session,
        "gql",
        "v1",
        vec![upstream.as_str()],
        "POST",
        "/graphql",
        json!({"api_type": "GRAPHQL"}),
    )
    .await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/graphql/gql")
        .header("content-type", "application/json")
        .header("cookie", &session.cookie)
        .header("x-api-version", "v1")
        .body(axum::body::Body::from(
            serde_json::to_vec(&json!({"query": "{ boom }", "variables": {}})).unwrap(),
        ))
        .unwrap();

    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["message"], "boom");
}

// ═══════════════════════════════════════════════════════════════════════════
//  gRPC dispatcher
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn grpc_without_descriptors_is_not_found() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    onboard_api(
        &state,
        &session,
        "grpcapi",
        "v1",
        vec!["grpc://127.0.0.1:9"],
        "POST",
        "/grpc",
        json!({"api_type": "GRPC"}),
    )
    .await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/grpc/grpcapi")
        .header("content-type", "application/json")
        .header("cookie", &session.cookie)
        .header("x-api-version", "v1")
        .body(axum::body::Body::from(
            serde_json::to_vec(&json!({"method": "Nope.Do", "message": {}})).unwrap(),
        ))
        .unwrap();

    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error_code"], "GTW011");
}

// ═══════════════════════════════════════════════════════════════════════════
//  CORS
// ═══════════════════════════════════════════════════════════════════════════

async fn onboard_cors_api(state: &doorman_gateway::state::AppState, session: &Session) {
    onboard_api(
        state,
        session,
        "corsy",
        "v1",
        vec!["http://127.0.0.1:9"],
        "GET",
        "/ok",
        json!({
            "api_cors_allow_origins": ["http://ok.example"],
            "api_cors_allow_methods": ["GET"],
            "api_cors_allow_headers": ["Content-Type"],
            "api_cors_allow_credentials": true,
        }),
    )
    .await;
}

#[tokio::test]
async fn preflight_echoes_origin_exactly_once() {
    let state = test_state().await;
    let session = login_admin(&state).await;
    onboard_cors_api(&state, &session).await;

    let request = axum::http::Request::builder()
        .method("OPTIONS")
        .uri("/api/rest/corsy/v1/ok")
        .header("origin", "http://ok.example")
        .header("access-control-request-method", "GET")
        .header("access-control-request-headers", "Content-Type")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let acao: Vec<_> = response
        .headers()
        .get_all("access-control-allow-origin")
        .iter()
        .collect();
    assert_eq!(acao.len(), 1);
    assert_eq!(acao[0], "http://ok.example");
    assert_eq!(
        response.headers()["access-control-allow-credentials"],
        "true"
    );
}

#[tokio::test]
async fn preflight_with_unlisted_request_header_still_carries_acao() {
    let state = test_state().await;
    let session = login_admin(&state).await;
    onboard_cors_api(&state, &session).await;

    // X-Random is not in the allow list; enforcement happens on the actual
    // request, the preflight still answers with ACAO.
    let request = axum::http::Request::builder()
        .method("OPTIONS")
        .uri("/api/rest/corsy/v1/ok")
        .header("origin", "http://ok.example")
        .header("access-control-request-method", "GET")
        .header("access-control-request-headers", "X-Random")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://ok.example"
    );
}

#[tokio::test]
async fn preflight_from_unlisted_origin_has_no_acao() {
    let state = test_state().await;
    let session = login_admin(&state).await;
    onboard_cors_api(&state, &session).await;

    let request = axum::http::Request::builder()
        .method("OPTIONS")
        .uri("/api/rest/corsy/v1/ok")
        .header("origin", "http://evil.example")
        .header("access-control-request-method", "GET")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(
        response
            .headers()
            .get("access-control-allow-origin")
            .is_none()
    );
}

// ═══════════════════════════════════════════════════════════════════════════
//  Credits
// ═══════════════════════════════════════════════════════════════════════════

async fn seed_credits(state: &doorman_gateway::state::AppState, session: &Session, group: &str) {
    let response = app(state.clone())
        .oneshot(authed_json(
            session,
            "POST",
            "/platform/credit",
            json!({
                "api_credit_group": group,
                "api_key": "UPSTREAM-KEY-123",
                "api_key_header": "x-api-key",
                "credit_tiers": [
                    {"tier_name": "default", "credits": 5, "reset_frequency": "monthly"}
                ],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app(state.clone())
        .oneshot(authed_json(
            session,
            "POST",
            "/platform/credit/admin",
            json!({
                "username": "admin",
                "users_credits": {
                    group: {"tier_name": "default", "available_credits": 2}
                },
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

async fn admin_credits_for(state: &doorman_gateway::state::AppState, session: &Session, group: &str) -> u64 {
    let response = app(state.clone())
        .oneshot(authed_get(session, "/platform/credit/admin"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["response"]["users_credits"][group]["available_credits"]
        .as_u64()
        .unwrap()
}

#[tokio::test]
async fn credit_deduction_is_at_most_once_even_when_upstream_fails() {
    let state = test_state().await;
    let session = login_admin(&state).await;
    seed_credits(&state, &session, "ai-group").await;

    onboard_api(
        &state,
        &session,
        "billed",
        "v1",
        vec!["http://127.0.0.1:9"],
        "GET",
        "/q",
        json!({"api_credit_group": "ai-group"}),
    )
    .await;

    assert_eq!(admin_credits_for(&state, &session, "ai-group").await, 2);

    // Upstream is dead: the request fails AFTER deduction, no refund.
    let response = app(state.clone())
        .oneshot(authed_get(&session, "/api/rest/billed/v1/q"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(admin_credits_for(&state, &session, "ai-group").await, 1);

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/api/rest/billed/v1/q"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(admin_credits_for(&state, &session, "ai-group").await, 0);

    // Exhausted: the gateway refuses before touching the upstream.
    let response = app(state.clone())
        .oneshot(authed_get(&session, "/api/rest/billed/v1/q"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body_json(response).await["error_code"], "GTW010");
}
