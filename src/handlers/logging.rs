// ---------------------------------------------------------------------------
// /platform/logging — the redacted in-memory log surface
// ---------------------------------------------------------------------------

use axum::Extension;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthContext;
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::permissions::{self, flags};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
    pub level: Option<String>,
    pub search: Option<String>,
}

/// GET /platform/logging/logs
pub async fn list_logs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(q): Query<LogsQuery>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::VIEW_LOGS).await?;

    let limit = q.limit.unwrap_or(200).min(1000);
    let logs = state
        .log_buffer
        .recent(limit, q.level.as_deref(), q.search.as_deref());
    Ok(ResponseEnvelope::success(
        200,
        json!({"logs": logs, "total": logs.len()}),
    ))
}

/// GET /platform/logging/export — full buffer as newline-delimited JSON.
pub async fn export_logs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<axum::response::Response, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::EXPORT_LOGS).await?;

    let body = state.log_buffer.snapshot().join("\n");
    Ok(axum::response::Response::builder()
        .header("content-type", "application/x-ndjson")
        .header("content-disposition", "attachment; filename=doorman-logs.ndjson")
        .body(axum::body::Body::from(body))
        .map_err(|e| GatewayError::Internal(e.to_string()))?)
}
