// ---------------------------------------------------------------------------
// /platform/routing — client-keyed backend routing with a persisted cursor
// ---------------------------------------------------------------------------

use axum::Extension;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use crate::auth::AuthContext;
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::models::RoutingDoc;
use crate::permissions::{self, flags};
use crate::state::AppState;
use crate::store::{collections, query};

pub async fn create_routing(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::Json(body): axum::Json<RoutingDoc>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_ROUTINGS).await?;

    if body.client_key.is_empty() {
        return Err(GatewayError::Validation("client_key is required".into()));
    }
    if body.routing_servers.is_empty() {
        return Err(GatewayError::Validation("routing_servers cannot be empty".into()));
    }

    let routings = state.collection(collections::ROUTINGS);
    if routings
        .find_one(&query(&[("client_key", json!(body.client_key))]))
        .await?
        .is_some()
    {
        return Err(GatewayError::Conflict(format!(
            "routing for client_key {} already exists",
            body.client_key
        )));
    }

    routings
        .insert_one(serde_json::to_value(&body).unwrap_or_default())
        .await?;
    Ok(ResponseEnvelope::success_message(201, "Routing created"))
}

pub async fn get_routing(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(client_key): Path<String>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_ROUTINGS).await?;
    let routing = state
        .collection(collections::ROUTINGS)
        .find_one(&query(&[("client_key", json!(client_key))]))
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("routing {client_key}")))?;
    Ok(ResponseEnvelope::success(200, routing))
}

pub async fn update_routing(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(client_key): Path<String>,
    axum::Json(body): axum::Json<Value>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_ROUTINGS).await?;

    let mut patch = query(&[]);
    if let Some(obj) = body.as_object() {
        for (key, value) in obj {
            if matches!(
                key.as_str(),
                "routing_name" | "routing_servers" | "routing_description" | "server_index"
            ) {
                patch.insert(key.clone(), value.clone());
            }
        }
    }
    if patch.is_empty() {
        return Err(GatewayError::BadRequest("no updatable fields supplied".into()));
    }

    let modified = state
        .collection(collections::ROUTINGS)
        .update_one(&query(&[("client_key", json!(client_key))]), &patch)
        .await?;
    if modified == 0 {
        return Err(GatewayError::NotFound(format!("routing {client_key}")));
    }
    Ok(ResponseEnvelope::success_message(200, "Routing updated"))
}

pub async fn delete_routing(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(client_key): Path<String>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_ROUTINGS).await?;

    let deleted = state
        .collection(collections::ROUTINGS)
        .delete_one(&query(&[("client_key", json!(client_key))]))
        .await?;
    if deleted == 0 {
        return Err(GatewayError::NotFound(format!("routing {client_key}")));
    }
    Ok(ResponseEnvelope::success_message(200, "Routing deleted"))
}
