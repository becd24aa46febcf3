mod common;

use axum::http::StatusCode;
use axum::http::header::COOKIE;
use serde_json::json;
use tower::ServiceExt;

use common::*;
use doorman_gateway::config::GatewaySettings;
use doorman_gateway::state::AppState;

// ═══════════════════════════════════════════════════════════════════════════
//  Login
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn login_sets_cookies_and_returns_token_pair() {
    let state = test_state().await;
    let response = app(state.clone())
        .oneshot(request_json(
            "POST",
            "/platform/authorization",
            json!({"email": "admin@doorman.dev", "password": "Password123!Password"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies: Vec<String> = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();
    assert!(
        cookies
            .iter()
            .any(|c| c.starts_with("access_token_cookie=") && c.contains("HttpOnly")),
        "missing HTTP-only access cookie: {cookies:?}"
    );
    assert!(
        cookies
            .iter()
            .any(|c| c.starts_with("csrf_token=") && !c.contains("HttpOnly")),
        "csrf cookie must be readable by JS: {cookies:?}"
    );

    let body = body_json(response).await;
    assert!(body["response"]["access_token"].is_string());
    assert!(body["response"]["csrf_token"].is_string());
    assert_eq!(body["response"]["token_type"], "bearer");
}

#[tokio::test]
async fn invalid_credentials_are_rejected() {
    let state = test_state().await;
    let response = app(state.clone())
        .oneshot(request_json(
            "POST",
            "/platform/authorization",
            json!({"email": "unknown@example.com", "password": "bad"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error_code"], "AUTH001");

    let response = app(state.clone())
        .oneshot(request_json(
            "POST",
            "/platform/authorization",
            json!({"email": "admin@doorman.dev", "password": "wrong-password"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_status_reports_valid_token() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/authorization/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"], "Token is valid");
}

#[tokio::test]
async fn missing_token_is_401() {
    let state = test_state().await;
    let response = app(state.clone())
        .oneshot(get("/platform/user/me"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bearer_header_works_without_cookie() {
    let state = test_state().await;
    let response = app(state.clone())
        .oneshot(request_json(
            "POST",
            "/platform/authorization",
            json!({"email": "admin@doorman.dev", "password": "Password123!Password"}),
        ))
        .await
        .unwrap();
    let token = body_json(response).await["response"]["access_token"]
        .as_str()
        .unwrap()
        .to_string();

    let request = axum::http::Request::builder()
        .uri("/platform/user/me")
        .header("authorization", format!("Bearer {token}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Revocation
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn invalidate_revokes_until_expiry() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/authorization/invalidate",
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Same cookie afterwards: revoked.
    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/user/me"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/authorization/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_rotates_the_token_and_revokes_the_old_one() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/authorization/refresh",
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let new_token = body["response"]["access_token"].as_str().unwrap();

    // Old cookie is dead, the fresh token works.
    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/user/me"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = axum::http::Request::builder()
        .uri("/platform/user/me")
        .header("authorization", format!("Bearer {new_token}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_revoke_kills_every_outstanding_token_for_a_user() {
    let state = test_state().await;
    let first = login_admin(&state).await;
    let second = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_json(
            &first,
            "POST",
            "/platform/authorization/admin/revoke/admin",
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for session in [&first, &second] {
        let response = app(state.clone())
            .oneshot(authed_get(session, "/platform/user/me"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  CSRF under HTTPS posture
// ═══════════════════════════════════════════════════════════════════════════

async fn https_state() -> AppState {
    let mut settings = GatewaySettings::for_tests();
    settings.https_enabled = true;
    AppState::new(settings).await.unwrap()
}

#[tokio::test]
async fn https_posture_requires_matching_csrf_header() {
    let state = https_state().await;
    let session = login_admin(&state).await;

    // Cookie alone: rejected.
    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/user/me"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Mismatched header: rejected.
    let request = axum::http::Request::builder()
        .uri("/platform/user/me")
        .header(COOKIE, &session.cookie)
        .header("x-csrf-token", "not-the-cookie")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Matching header: accepted.
    let request = axum::http::Request::builder()
        .uri("/platform/user/me")
        .header(COOKIE, &session.cookie)
        .header("x-csrf-token", &session.csrf)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn plain_http_posture_skips_csrf() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/user/me"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Login IP throttle
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn third_login_in_window_is_throttled_with_retry_headers() {
    let mut settings = GatewaySettings::for_tests();
    settings.login_ip_rate_limit = 2;
    settings.login_ip_rate_window = 60;
    let state = AppState::new(settings).await.unwrap();

    let creds = json!({"email": "admin@doorman.dev", "password": "Password123!Password"});
    for _ in 0..2 {
        let response = app(state.clone())
            .oneshot(request_json("POST", "/platform/authorization", creds.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app(state.clone())
        .oneshot(request_json("POST", "/platform/authorization", creds))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    for header in [
        "retry-after",
        "x-ratelimit-limit",
        "x-ratelimit-remaining",
        "x-ratelimit-reset",
    ] {
        assert!(
            response.headers().contains_key(header),
            "missing {header} header"
        );
    }
    assert_eq!(response.headers()["x-ratelimit-limit"], "2");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");

    let body = body_json(response).await;
    assert!(body["error_code"].is_string());
}

#[tokio::test]
async fn throttle_can_be_disabled() {
    let mut settings = GatewaySettings::for_tests();
    settings.login_ip_rate_limit = 1;
    settings.login_ip_rate_disabled = true;
    let state = AppState::new(settings).await.unwrap();

    let creds = json!({"email": "admin@doorman.dev", "password": "Password123!Password"});
    for _ in 0..4 {
        let response = app(state.clone())
            .oneshot(request_json("POST", "/platform/authorization", creds.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
