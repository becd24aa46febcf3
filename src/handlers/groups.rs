// ---------------------------------------------------------------------------
// /platform/group — group CRUD; api_access tokens grant gateway access
// ---------------------------------------------------------------------------

use axum::Extension;
use axum::extract::{Path, Query, State};
use serde_json::{Value, json};

use crate::auth::AuthContext;
use crate::cache::keys;
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::models::{GroupDoc, PageQuery};
use crate::permissions::{self, flags};
use crate::state::AppState;
use crate::store::{collections, query};

use super::page_params;

pub async fn create_group(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::Json(body): axum::Json<GroupDoc>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_GROUPS).await?;
    if body.group_name.is_empty() {
        return Err(GatewayError::Validation("group_name is required".into()));
    }

    let groups = state.collection(collections::GROUPS);
    if groups
        .find_one(&query(&[("group_name", json!(body.group_name))]))
        .await?
        .is_some()
    {
        return Err(GatewayError::Conflict(format!(
            "group {} already exists",
            body.group_name
        )));
    }

    groups
        .insert_one(serde_json::to_value(&body).unwrap_or_default())
        .await?;
    Ok(ResponseEnvelope::success_message(201, "Group created"))
}

pub async fn get_group(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(group_name): Path<String>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_GROUPS).await?;
    let group = state
        .get_group(&group_name)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("group {group_name}")))?;
    Ok(ResponseEnvelope::success(200, group))
}

pub async fn update_group(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(group_name): Path<String>,
    axum::Json(body): axum::Json<Value>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_GROUPS).await?;

    let mut patch = query(&[]);
    if let Some(obj) = body.as_object() {
        for (key, value) in obj {
            if key == "group_description" || key == "api_access" {
                patch.insert(key.clone(), value.clone());
            }
        }
    }
    if patch.is_empty() {
        return Err(GatewayError::BadRequest("no updatable fields supplied".into()));
    }

    let modified = state
        .collection(collections::GROUPS)
        .update_one(&query(&[("group_name", json!(group_name))]), &patch)
        .await?;
    if modified == 0 {
        return Err(GatewayError::NotFound(format!("group {group_name}")));
    }

    state.cache.invalidate(&keys::group(&group_name));
    Ok(ResponseEnvelope::success_message(200, "Group updated"))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(group_name): Path<String>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_GROUPS).await?;
    if group_name == "ALL" {
        return Err(GatewayError::BadRequest("the default group cannot be deleted".into()));
    }

    let deleted = state
        .collection(collections::GROUPS)
        .delete_one(&query(&[("group_name", json!(group_name))]))
        .await?;
    if deleted == 0 {
        return Err(GatewayError::NotFound(format!("group {group_name}")));
    }

    state.cache.invalidate(&keys::group(&group_name));
    Ok(ResponseEnvelope::success_message(200, "Group deleted"))
}

pub async fn list_groups(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(page): Query<PageQuery>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_GROUPS).await?;
    let (skip, limit) = page_params(&state.settings, &page)?;

    let groups = state
        .collection(collections::GROUPS)
        .find(query(&[]))
        .skip(skip)
        .limit(limit)
        .to_list()
        .await?;
    Ok(ResponseEnvelope::success(200, json!({"groups": groups})))
}
