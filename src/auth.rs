// ---------------------------------------------------------------------------
// Request authentication middleware
// ---------------------------------------------------------------------------
// Bearer token from the access cookie or Authorization header, revocation
// ledger consultation, and the CSRF double-submit check under HTTPS posture.
// Platform routes hang this middleware on the router; the protocol
// dispatchers call `authenticate` directly so public APIs can skip it.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::middleware::Next;
use axum::response::Response;

use crate::envelope::GatewayError;
use crate::state::AppState;
use crate::tokens;

pub const ACCESS_COOKIE: &str = "access_token_cookie";
pub const CSRF_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Identity attached to the request after successful validation.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub username: String,
    pub token_id: String,
    pub expires_at: i64,
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
}

/// Full per-request validation: extract, verify, consult the ledger, and
/// enforce CSRF when the deployment runs under HTTPS posture.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, GatewayError> {
    let token = cookie_value(headers, ACCESS_COOKIE)
        .or_else(|| bearer_token(headers))
        .ok_or_else(|| GatewayError::Auth("missing credentials".into()))?;

    let claims = tokens::verify(&state.settings.jwt_secret, token)?;

    if state.ledger.is_revoked(&claims.sub, &claims.jti).await {
        return Err(GatewayError::Auth("token has been revoked".into()));
    }

    if state.settings.https_posture() {
        let cookie = cookie_value(headers, CSRF_COOKIE)
            .ok_or_else(|| GatewayError::Auth("missing CSRF cookie".into()))?;
        let header = headers
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| GatewayError::Auth("missing X-CSRF-Token header".into()))?;
        if !tokens::tokens_match(cookie, header) {
            return Err(GatewayError::Auth("CSRF token mismatch".into()));
        }
    }

    Ok(AuthContext {
        username: claims.sub,
        token_id: claims.jti,
        expires_at: claims.exp as i64,
    })
}

/// Router middleware for the platform surface. Inserts `AuthContext` as a
/// request extension for downstream handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let auth = authenticate(&state, request.headers()).await?;
    request.extensions_mut().insert(auth);
    Ok(next.run(request).await)
}

// ---------------------------------------------------------------------------
// Cookie builders
// ---------------------------------------------------------------------------

fn cookie_attributes(state: &AppState, http_only: bool, max_age: i64) -> String {
    let mut attrs = String::from("; Path=/; SameSite=Lax");
    if http_only {
        attrs.push_str("; HttpOnly");
    }
    if state.settings.https_posture() {
        attrs.push_str("; Secure");
    }
    if let Some(domain) = &state.settings.cookie_domain {
        attrs.push_str(&format!("; Domain={domain}"));
    }
    attrs.push_str(&format!("; Max-Age={max_age}"));
    attrs
}

/// `Set-Cookie` pair for a fresh login/refresh: the HTTP-only access token
/// and the JS-readable CSRF token.
pub fn auth_cookies(state: &AppState, access_token: &str, csrf_token: &str) -> Vec<(axum::http::HeaderName, String)> {
    let ttl = state.settings.token_ttl_seconds as i64;
    vec![
        (
            SET_COOKIE,
            format!(
                "{ACCESS_COOKIE}={access_token}{}",
                cookie_attributes(state, true, ttl)
            ),
        ),
        (
            SET_COOKIE,
            format!(
                "{CSRF_COOKIE}={csrf_token}{}",
                cookie_attributes(state, false, ttl)
            ),
        ),
    ]
}

/// Expired cookies for logout/invalidate.
pub fn clear_cookies(state: &AppState) -> Vec<(axum::http::HeaderName, String)> {
    vec![
        (
            SET_COOKIE,
            format!("{ACCESS_COOKIE}={}", cookie_attributes(state, true, 0)),
        ),
        (
            SET_COOKIE,
            format!("{CSRF_COOKIE}={}", cookie_attributes(state, false, 0)),
        ),
    ]
}
