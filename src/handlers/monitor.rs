// ---------------------------------------------------------------------------
// Health probes, dependency status and the metrics snapshot
// ---------------------------------------------------------------------------

use axum::Extension;
use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use crate::auth::AuthContext;
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::permissions::{self, flags};
use crate::state::AppState;

/// GET /api/health — public liveness.
#[utoipa::path(get, path = "/api/health", tag = "monitor",
    responses((status = 200, description = "Gateway is up", body = Value))
)]
pub async fn api_health() -> Json<Value> {
    Json(json!({"status": "online"}))
}

/// GET /api/status — authenticated dependency overview.
#[utoipa::path(get, path = "/api/status", tag = "monitor",
    responses((status = 200, description = "Uptime + dependency booleans", body = Value))
)]
pub async fn api_status(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthContext>,
) -> Json<Value> {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();

    Json(json!({
        "uptime": state.metrics.uptime_seconds(),
        "memory_usage": sys.used_memory(),
        "mongodb": state.mongo_healthy().await,
        "redis": state.redis_healthy().await,
    }))
}

/// GET /platform/monitor/liveness — always alive when the loop runs.
pub async fn liveness() -> Json<Value> {
    Json(json!({"status": "alive"}))
}

/// GET /platform/monitor/readiness — degrades while a backend is out.
pub async fn readiness(State(state): State<AppState>) -> Json<Value> {
    let (mongo_ok, redis_ok) = state.chaos.healthy();
    let status = if state.is_ready() && mongo_ok && redis_ok {
        "ready"
    } else {
        "degraded"
    };
    Json(json!({"status": status}))
}

/// GET /platform/monitor/metrics — the in-memory counters snapshot.
pub async fn metrics_snapshot(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<ResponseEnvelope, GatewayError> {
    if permissions::require_permission(&state, &auth.username, flags::VIEW_LOGS)
        .await
        .is_err()
    {
        permissions::require_permission(&state, &auth.username, flags::MANAGE_GATEWAY).await?;
    }
    Ok(ResponseEnvelope::success(200, state.metrics.to_dict()))
}

/// DELETE /api/caches — clears every read-through cache.
pub async fn clear_caches(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_GATEWAY).await?;
    let cleared = state.cache.clear();
    Ok(ResponseEnvelope::success(200, json!({"cleared_entries": cleared})).into_response())
}
