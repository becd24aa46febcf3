// ---------------------------------------------------------------------------
// /platform/authorization — login, refresh, invalidate, status, admin revoke
// ---------------------------------------------------------------------------

use axum::Extension;
use axum::body::Body;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::net::SocketAddr;

use crate::auth::{AuthContext, auth_cookies, clear_cookies};
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::ip_policy;
use crate::models::{LoginRequest, LoginResponse};
use crate::permissions::{self, flags};
use crate::rate_limit::check_window;
use crate::state::AppState;
use crate::tokens;

/// POST /platform/authorization — issue a bearer token + CSRF pair as
/// cookies. Throttled per client IP on a fixed window.
#[utoipa::path(post, path = "/platform/authorization", tag = "authorization",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = LoginResponse),
        (status = 401, description = "Bad credentials", body = ResponseEnvelope),
        (status = 429, description = "Login throttled", body = ResponseEnvelope)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response, GatewayError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let headers = request.headers().clone();

    enforce_login_throttle(&state, &headers, peer).await?;

    let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
    let body: LoginRequest = serde_json::from_slice(&bytes)
        .map_err(|e| GatewayError::BadRequest(format!("malformed login request: {e}")))?;

    let user = state
        .get_user_by_email(&body.email)
        .await?
        .ok_or_else(|| GatewayError::Auth("invalid email or password".into()))?;

    if !user.get("active").and_then(Value::as_bool).unwrap_or(true) {
        return Err(GatewayError::Auth("account is disabled".into()));
    }

    let hash = user
        .get("password_hash")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !crate::passwords::verify(&body.password, hash).await? {
        tracing::warn!("login failed for {}", body.email);
        return Err(GatewayError::Auth("invalid email or password".into()));
    }

    let username = user
        .get("username")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    issue_session(&state, &username).await
}

async fn enforce_login_throttle(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<std::net::IpAddr>,
) -> Result<(), GatewayError> {
    if state.settings.login_ip_rate_disabled {
        return Ok(());
    }
    let security = state.security_settings().await;
    let ip = ip_policy::client_ip(
        headers,
        peer,
        security.trust_x_forwarded_for,
        &security.xff_trusted_proxies,
    );
    check_window(
        &state.counter,
        &format!("login:{ip}"),
        state.settings.login_ip_rate_limit,
        state.settings.login_ip_rate_window,
    )
    .await
    .map(|_| ())
    .map_err(|quota| {
        tracing::warn!("login throttled for ip={}", ip);
        GatewayError::RateLimited {
            limit: quota.limit,
            remaining: quota.remaining,
            reset_in: quota.reset_in,
        }
    })
}

/// Issue the token + CSRF pair and attach both cookies.
async fn issue_session(state: &AppState, username: &str) -> Result<Response, GatewayError> {
    let ttl = state.settings.token_ttl_seconds;
    let (token, claims) = tokens::issue(&state.settings.jwt_secret, username, ttl)?;
    state
        .ledger
        .note_issued(username, &claims.jti, claims.exp as i64);

    let csrf = tokens::new_csrf_token();

    let envelope = ResponseEnvelope::success(
        200,
        serde_json::to_value(LoginResponse {
            access_token: token.clone(),
            csrf_token: csrf.clone(),
            token_type: "bearer".into(),
            expires_in: ttl,
        })
        .unwrap_or_default(),
    );

    let mut response = envelope.into_response();
    for (name, value) in auth_cookies(state, &token, &csrf) {
        if let Ok(value) = axum::http::HeaderValue::from_str(&value) {
            response.headers_mut().append(name, value);
        }
    }
    Ok(response)
}

/// POST /platform/authorization/refresh — fresh pair; the old token id goes
/// to the ledger with its original expiry as purge-after.
pub async fn refresh(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, GatewayError> {
    state
        .ledger
        .revoke(&auth.username, &auth.token_id, auth.expires_at)
        .await;
    issue_session(&state, &auth.username).await
}

/// POST /platform/authorization/invalidate — revoke and clear cookies.
pub async fn invalidate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, GatewayError> {
    state
        .ledger
        .revoke(&auth.username, &auth.token_id, auth.expires_at)
        .await;

    let mut response =
        ResponseEnvelope::success_message(200, "Token invalidated").into_response();
    for (name, value) in clear_cookies(&state) {
        if let Ok(value) = axum::http::HeaderValue::from_str(&value) {
            response.headers_mut().append(name, value);
        }
    }
    Ok(response)
}

/// GET /platform/authorization/status
#[utoipa::path(get, path = "/platform/authorization/status", tag = "authorization",
    responses((status = 200, description = "Token is valid", body = ResponseEnvelope))
)]
pub async fn token_status(Extension(auth): Extension<AuthContext>) -> ResponseEnvelope {
    ResponseEnvelope {
        status_code: Some(200),
        message: Some("Token is valid".into()),
        response: Some(json!({"username": auth.username})),
        ..Default::default()
    }
}

/// POST /platform/authorization/admin/revoke/{username} — requires
/// manage_auth; pushes every outstanding token id for the user.
pub async fn admin_revoke(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_AUTH).await?;
    let revoked = state.ledger.revoke_all_for(&username).await;
    Ok(ResponseEnvelope::success(
        200,
        json!({"username": username, "revoked": revoked}),
    ))
}
