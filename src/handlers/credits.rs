// ---------------------------------------------------------------------------
// /platform/credit — credit definitions and per-user balances
// ---------------------------------------------------------------------------
// Upstream API keys are encrypted at rest and masked on every read.

use axum::Extension;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use crate::auth::AuthContext;
use crate::credits::mask_credit_def;
use crate::crypto::encrypt_value;
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::models::CreditDefDoc;
use crate::permissions::{self, flags};
use crate::state::AppState;
use crate::store::{collections, query};

pub async fn create_credit_def(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::Json(body): axum::Json<CreditDefDoc>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_CREDITS).await?;

    if body.api_credit_group.is_empty() {
        return Err(GatewayError::Validation("api_credit_group is required".into()));
    }

    let defs = state.collection(collections::CREDIT_DEFS);
    let group_query = query(&[("api_credit_group", json!(body.api_credit_group))]);
    let secret = state.value_encryption_key();

    let mut doc = serde_json::to_value(&body).unwrap_or_default();
    if let Some(obj) = doc.as_object_mut() {
        for key_field in ["api_key", "api_key_new"] {
            if let Some(raw) = obj.get(key_field).and_then(Value::as_str) {
                let encrypted = encrypt_value(secret, raw);
                obj.insert(key_field.into(), json!(encrypted));
            }
        }
    }

    if defs.find_one(&group_query).await?.is_some() {
        defs.replace_one(&group_query, doc).await?;
        return Ok(ResponseEnvelope::success_message(200, "Credit definition updated"));
    }
    defs.insert_one(doc).await?;
    Ok(ResponseEnvelope::success_message(201, "Credit definition created"))
}

pub async fn list_credit_defs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_CREDITS).await?;

    let defs = state
        .collection(collections::CREDIT_DEFS)
        .find(query(&[]))
        .to_list()
        .await?
        .into_iter()
        .map(mask_credit_def)
        .collect::<Vec<_>>();
    Ok(ResponseEnvelope::success(200, json!({"credit_defs": defs})))
}

pub async fn get_credit_def(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(group): Path<String>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_CREDITS).await?;

    let def = state
        .collection(collections::CREDIT_DEFS)
        .find_one(&query(&[("api_credit_group", json!(group))]))
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("credit group {group}")))?;
    Ok(ResponseEnvelope::success(200, mask_credit_def(def)))
}

pub async fn delete_credit_def(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(group): Path<String>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_CREDITS).await?;

    let deleted = state
        .collection(collections::CREDIT_DEFS)
        .delete_one(&query(&[("api_credit_group", json!(group))]))
        .await?;
    if deleted == 0 {
        return Err(GatewayError::NotFound(format!("credit group {group}")));
    }
    Ok(ResponseEnvelope::success_message(200, "Credit definition deleted"))
}

/// POST /platform/credit/{username} — upsert a user's balances. Any
/// per-user key in the payload is encrypted before it lands in the store.
pub async fn set_user_credits(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
    axum::Json(body): axum::Json<Value>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_CREDITS).await?;

    let mut users_credits = body
        .get("users_credits")
        .cloned()
        .ok_or_else(|| GatewayError::Validation("users_credits is required".into()))?;

    let secret = state.value_encryption_key();
    if let Some(groups) = users_credits.as_object_mut() {
        for entry in groups.values_mut() {
            if let Some(obj) = entry.as_object_mut() {
                if let Some(raw) = obj.get("user_api_key").and_then(Value::as_str) {
                    let encrypted = encrypt_value(secret, raw);
                    obj.insert("user_api_key".into(), json!(encrypted));
                }
            }
        }
    }

    let coll = state.collection(collections::USER_CREDITS);
    let user_query = query(&[("username", json!(username))]);
    match coll.find_one(&user_query).await? {
        Some(_) => {
            coll.update_one(&user_query, &query(&[("users_credits", users_credits)]))
                .await?;
        }
        None => {
            coll.insert_one(json!({"username": username, "users_credits": users_credits}))
                .await?;
        }
    }

    Ok(ResponseEnvelope::success_message(200, "User credits updated"))
}

pub async fn get_user_credits(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<ResponseEnvelope, GatewayError> {
    if auth.username != username {
        permissions::require_permission(&state, &auth.username, flags::MANAGE_CREDITS).await?;
    }

    let mut doc = state
        .collection(collections::USER_CREDITS)
        .find_one(&query(&[("username", json!(username))]))
        .await?
        .unwrap_or_else(|| json!({"username": username, "users_credits": {}}));

    // Per-user keys are never returned, only their presence.
    if let Some(groups) = doc
        .get_mut("users_credits")
        .and_then(Value::as_object_mut)
    {
        for entry in groups.values_mut() {
            if let Some(obj) = entry.as_object_mut() {
                let present = obj.remove("user_api_key").is_some();
                obj.insert("user_api_key_present".into(), json!(present));
            }
        }
    }

    Ok(ResponseEnvelope::success(200, doc))
}
