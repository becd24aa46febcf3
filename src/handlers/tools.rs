// ---------------------------------------------------------------------------
// /platform/tools — chaos toggles
// ---------------------------------------------------------------------------

use axum::Extension;
use axum::extract::State;
use serde_json::json;

use crate::auth::AuthContext;
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::models::ChaosToggleRequest;
use crate::permissions::{self, flags};
use crate::state::AppState;

/// POST /platform/tools/chaos/toggle — flip a backend outage window;
/// `duration_ms` arms an auto-clear timer.
pub async fn chaos_toggle(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::Json(body): axum::Json<ChaosToggleRequest>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_GATEWAY).await?;

    let applied = match (body.enabled, body.duration_ms) {
        (true, Some(duration_ms)) => state.chaos.enable_for(&body.backend, duration_ms),
        _ => state.chaos.set(&body.backend, body.enabled),
    };
    if !applied {
        return Err(GatewayError::BadRequest(format!(
            "unknown backend {:?} (expected redis or mongo)",
            body.backend
        )));
    }

    Ok(ResponseEnvelope::success(
        200,
        json!({
            "backend": body.backend,
            "enabled": body.enabled,
            "duration_ms": body.duration_ms,
        }),
    ))
}

/// GET /platform/tools/chaos/stats
pub async fn chaos_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_GATEWAY).await?;
    Ok(ResponseEnvelope::success(200, state.chaos.stats()))
}
