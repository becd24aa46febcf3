mod common;

use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

use common::*;

// ═══════════════════════════════════════════════════════════════════════════
//  Health & monitoring
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn health_is_public() {
    let state = test_state().await;
    let response = app(state).oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "online");
}

#[tokio::test]
async fn liveness_and_readiness_probes() {
    let state = test_state().await;

    let response = app(state.clone())
        .oneshot(get("/platform/monitor/liveness"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "alive");

    let response = app(state.clone())
        .oneshot(get("/platform/monitor/readiness"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ready");

    state.chaos.set("redis", true);
    let response = app(state.clone())
        .oneshot(get("/platform/monitor/readiness"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["status"], "degraded");
}

#[tokio::test]
async fn api_status_reports_dependencies() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/api/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["uptime"].is_u64());
    assert!(body["memory_usage"].is_u64());
    assert_eq!(body["mongodb"], true);
    assert_eq!(body["redis"], true);
}

#[tokio::test]
async fn metrics_snapshot_counts_requests() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    // Generate some traffic first.
    let _ = app(state.clone()).oneshot(get("/api/health")).await.unwrap();

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/monitor/metrics"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["response"]["total_requests"].as_u64().unwrap() >= 1);
    assert!(body["response"]["status_counts"].is_object());
    assert!(body["response"]["buckets"].is_array());
}

#[tokio::test]
async fn prometheus_scrape_allows_loopback_and_uses_text_format() {
    let state = test_state().await;
    let response = app(state).oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; version=0.0.4"
    );
    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("doorman_requests_total"));
}

#[tokio::test]
async fn unknown_route_is_404() {
    let state = test_state().await;
    let response = app(state).oneshot(get("/api/nonexistent")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ═══════════════════════════════════════════════════════════════════════════
//  User lifecycle
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn user_onboarding_lifecycle() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/role",
            json!({"role_name": "developer", "manage_apis": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/user",
            json!({
                "username": "dev1",
                "email": "dev1@example.com",
                "password": "Sup3rSecret!Pass",
                "role": "developer",
                "groups": ["ALL"],
                "ui_access": false,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // Read back; no credential material leaves the store.
    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/user/dev1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["response"]["email"], "dev1@example.com");
    assert_eq!(body["response"]["ui_access"], false);
    assert!(body["response"].get("password_hash").is_none());

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "PUT",
            "/platform/user/dev1",
            json!({"ui_access": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The new user can log in and see themselves.
    let response = app(state.clone())
        .oneshot(request_json(
            "POST",
            "/platform/authorization",
            json!({"email": "dev1@example.com", "password": "Sup3rSecret!Pass"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(state.clone())
        .oneshot(authed_delete(&session, "/platform/user/dev1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn weak_passwords_are_rejected() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/user",
            json!({
                "username": "weak",
                "email": "weak@example.com",
                "password": "short",
                "role": "admin",
                "groups": ["ALL"],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_code"], "VAL001");
}

// ═══════════════════════════════════════════════════════════════════════════
//  Permissions
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn role_without_flag_is_denied_with_api_code() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/role",
            json!({"role_name": "viewer", "view_logs": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/user",
            json!({
                "username": "viewer1",
                "email": "viewer1@example.com",
                "password": "V1ewOnly!Passw0rd",
                "role": "viewer",
                "groups": ["ALL"],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let viewer = {
        let response = app(state.clone())
            .oneshot(request_json(
                "POST",
                "/platform/authorization",
                json!({"email": "viewer1@example.com", "password": "V1ewOnly!Passw0rd"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookies: Vec<String> = response
            .headers()
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .map(str::to_string)
            .collect();
        Session {
            cookie: cookies.join("; "),
            csrf: String::new(),
        }
    };

    let response = app(state.clone())
        .oneshot(authed_json(
            &viewer,
            "POST",
            "/platform/api",
            json!({"api_name": "x", "api_version": "v1", "api_servers": ["http://h"], "active": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error_code"], "API007");

    // But the flag it does hold works.
    let response = app(state.clone())
        .oneshot(authed_get(&viewer, "/platform/logging/logs"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_role_cannot_be_deleted() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_delete(&session, "/platform/role/admin"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Credit definition masking
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn credit_definition_reads_never_return_the_key() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/credit",
            json!({
                "api_credit_group": "maskgroup",
                "api_key": "VERY-SECRET-KEY",
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
        .oneshot(authed_get(&session, "/platform/credit/defs/maskgroup"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let def = &body["response"];
    assert_eq!(def["api_credit_group"], "maskgroup");
    assert_eq!(def["api_key_header"], "x-api-key");
    assert_eq!(def["api_key_present"], true);
    assert!(def.get("api_key").is_none());
    // The raw key must not appear anywhere in the response.
    assert!(!body.to_string().contains("VERY-SECRET-KEY"));
}

// ═══════════════════════════════════════════════════════════════════════════
//  Chaos toggles
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn chaos_toggle_window_auto_clears_and_burns_budget() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/tools/chaos/toggle",
            json!({"backend": "redis", "enabled": true, "duration_ms": 300}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["response"]["enabled"], true);

    assert!(state.chaos.should_fail("redis"));
    state.chaos.burn("redis");

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/tools/chaos/stats"))
        .await
        .unwrap();
    let stats = body_json(response).await;
    assert_eq!(stats["response"]["redis_outage"], true);
    assert!(stats["response"]["error_budget_burn"].as_u64().unwrap() >= 1);

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert!(!state.chaos.should_fail("redis"));

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/tools/chaos/toggle",
            json!({"backend": "notabackend", "enabled": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Config export / import round trip
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn config_export_import_round_trip_keeps_counts() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    onboard_api(
        &state,
        &session,
        "exported",
        "v1",
        vec!["http://127.0.0.1:9"],
        "GET",
        "/x",
        json!({}),
    )
    .await;

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/config/export/all"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let exported = body_json(response).await["response"].clone();
    let apis_before = exported["apis"].as_array().unwrap().len();
    let users_before = exported["users"].as_array().unwrap().len();
    assert!(apis_before >= 1);
    assert!(users_before >= 1);

    // Wipe one section, then import the snapshot back.
    let response = app(state.clone())
        .oneshot(authed_delete(&session, "/platform/api/exported/v1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/config/import",
            exported.clone(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let imported = body_json(response).await;
    assert!(imported["response"]["imported"].is_object());

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/config/export/all"))
        .await
        .unwrap();
    let re_exported = body_json(response).await["response"].clone();
    assert_eq!(re_exported["apis"].as_array().unwrap().len(), apis_before);
    assert_eq!(re_exported["users"].as_array().unwrap().len(), users_before);
    assert_eq!(
        re_exported["endpoints"].as_array().unwrap().len(),
        exported["endpoints"].as_array().unwrap().len()
    );
}

// ═══════════════════════════════════════════════════════════════════════════
//  Memory dump / restore
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn memory_dump_then_restore_rolls_state_back() {
    let mut settings = doorman_gateway::config::GatewaySettings::for_tests();
    let dir = tempfile::tempdir().unwrap();
    settings.mem_dump_path = dir
        .path()
        .join("dump.bin")
        .to_string_lossy()
        .into_owned();
    let state = doorman_gateway::state::AppState::new(settings).await.unwrap();
    let session = login_admin(&state).await;

    onboard_api(
        &state,
        &session,
        "before",
        "v1",
        vec!["http://127.0.0.1:9"],
        "GET",
        "/x",
        json!({}),
    )
    .await;

    let response = app(state.clone())
        .oneshot(authed_json(&session, "POST", "/platform/memory/dump", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let path = body_json(response).await["response"]["path"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(std::path::Path::new(&path).exists());

    // Mutate after the snapshot.
    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/api",
            json!({"api_name": "after", "api_version": "v1", "api_servers": ["http://h"], "active": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "POST",
            "/platform/memory/restore",
            json!({"path": path}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Back to the snapshot: "before" exists, "after" does not.
    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/api/before/v1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/api/after/v1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Caches & security settings
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn cache_clear_requires_manage_gateway() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    // Warm the cache with a lookup.
    let _ = app(state.clone())
        .oneshot(authed_get(&session, "/platform/user/me"))
        .await
        .unwrap();

    let response = app(state.clone())
        .oneshot(authed_delete(&session, "/api/caches"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.cache.is_empty());
}

#[tokio::test]
async fn security_settings_round_trip() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/security/settings"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "PUT",
            "/platform/security/settings",
            json!({"ip_blacklist": ["9.9.9.9"], "trust_x_forwarded_for": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["response"]["ip_blacklist"][0], "9.9.9.9");
    assert_eq!(body["response"]["trust_x_forwarded_for"], true);

    let response = app(state.clone())
        .oneshot(authed_json(
            &session,
            "PUT",
            "/platform/security/settings",
            json!({"auto_save_frequency_seconds": 10}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Logging surface
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn logging_routes_serve_the_ring_buffer() {
    let state = test_state().await;
    let session = login_admin(&state).await;

    state
        .log_buffer
        .add(json!({"level": "INFO", "message": "gateway started"}).to_string());

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/logging/logs?limit=10"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["response"]["total"].as_u64().unwrap() >= 1);

    let response = app(state.clone())
        .oneshot(authed_get(&session, "/platform/logging/export"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/x-ndjson"
    );
}

// ═══════════════════════════════════════════════════════════════════════════
//  WebSocket reject-by-default
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn websocket_upgrades_are_rejected() {
    let state = test_state().await;
    let request = axum::http::Request::builder()
        .uri("/api/health")
        .header("upgrade", "websocket")
        .header("connection", "Upgrade")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
