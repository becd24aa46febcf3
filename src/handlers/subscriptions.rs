// ---------------------------------------------------------------------------
// /platform/subscription — per-user API subscription grants
// ---------------------------------------------------------------------------

use axum::Extension;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use crate::auth::AuthContext;
use crate::cache::keys;
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::models::SubscribeRequest;
use crate::permissions::{self, flags};
use crate::state::AppState;
use crate::store::{collections, query};

pub async fn subscribe(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::Json(body): axum::Json<SubscribeRequest>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_SUBSCRIPTIONS).await?;

    if state.get_user(&body.username).await?.is_none() {
        return Err(GatewayError::NotFound(format!("user {}", body.username)));
    }
    if state
        .get_api(&body.api_name, &body.api_version)
        .await?
        .is_none()
    {
        return Err(GatewayError::ApiNotFound(format!(
            "{}/{}",
            body.api_name, body.api_version
        )));
    }

    let token = format!("{}/{}", body.api_name, body.api_version);
    let subscriptions = state.collection(collections::SUBSCRIPTIONS);
    let user_query = query(&[("username", json!(body.username))]);

    match subscriptions.find_one(&user_query).await? {
        Some(doc) => {
            let mut apis: Vec<String> = doc
                .get("apis")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if !apis.contains(&token) {
                apis.push(token.clone());
            }
            subscriptions
                .update_one(&user_query, &query(&[("apis", json!(apis))]))
                .await?;
        }
        None => {
            subscriptions
                .insert_one(json!({"username": body.username, "apis": [token]}))
                .await?;
        }
    }

    state.cache.invalidate(&keys::subscriptions(&body.username));
    Ok(ResponseEnvelope::success_message(201, "Subscribed"))
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::Json(body): axum::Json<SubscribeRequest>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_SUBSCRIPTIONS).await?;

    let token = format!("{}/{}", body.api_name, body.api_version);
    let subscriptions = state.collection(collections::SUBSCRIPTIONS);
    let user_query = query(&[("username", json!(body.username))]);

    let doc = subscriptions
        .find_one(&user_query)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("no subscriptions for {}", body.username)))?;

    let apis: Vec<String> = doc
        .get("apis")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .filter(|api| *api != token)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    subscriptions
        .update_one(&user_query, &query(&[("apis", json!(apis))]))
        .await?;

    state.cache.invalidate(&keys::subscriptions(&body.username));
    Ok(ResponseEnvelope::success_message(200, "Unsubscribed"))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<ResponseEnvelope, GatewayError> {
    if auth.username != username {
        permissions::require_permission(&state, &auth.username, flags::MANAGE_SUBSCRIPTIONS)
            .await?;
    }
    let apis = state.get_subscriptions(&username).await?;
    Ok(ResponseEnvelope::success(
        200,
        json!({"username": username, "apis": apis}),
    ))
}
