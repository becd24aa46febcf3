// ---------------------------------------------------------------------------
// /platform/role — role CRUD; the admin role is specially protected
// ---------------------------------------------------------------------------

use axum::Extension;
use axum::extract::{Path, Query, State};
use serde_json::{Value, json};

use crate::auth::AuthContext;
use crate::cache::keys;
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::models::{PageQuery, RoleDoc};
use crate::permissions::{self, flags, is_admin};
use crate::state::AppState;
use crate::store::{collections, query};

use super::page_params;

pub async fn create_role(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::Json(body): axum::Json<RoleDoc>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_ROLES).await?;

    if body.role_name.is_empty() {
        return Err(GatewayError::Validation("role_name is required".into()));
    }
    if body.role_name == "admin" && !is_admin(&state, &auth.username).await? {
        return Err(GatewayError::PermissionDenied(
            "only admins may define the admin role".into(),
        ));
    }

    let roles = state.collection(collections::ROLES);
    if roles
        .find_one(&query(&[("role_name", json!(body.role_name))]))
        .await?
        .is_some()
    {
        return Err(GatewayError::Conflict(format!(
            "role {} already exists",
            body.role_name
        )));
    }

    roles
        .insert_one(serde_json::to_value(&body).unwrap_or_default())
        .await?;
    Ok(ResponseEnvelope::success_message(201, "Role created"))
}

pub async fn get_role(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(role_name): Path<String>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_ROLES).await?;
    let role = state
        .get_role(&role_name)
        .await?
        .ok_or_else(|| GatewayError::RoleNotFound(role_name.clone()))?;
    Ok(ResponseEnvelope::success(200, role))
}

pub async fn update_role(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(role_name): Path<String>,
    axum::Json(body): axum::Json<Value>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_ROLES).await?;
    if role_name == "admin" && !is_admin(&state, &auth.username).await? {
        return Err(GatewayError::PermissionDenied(
            "only admins may modify the admin role".into(),
        ));
    }

    let mut patch = query(&[]);
    if let Some(obj) = body.as_object() {
        for (key, value) in obj {
            if key != "role_name" {
                patch.insert(key.clone(), value.clone());
            }
        }
    }
    if patch.is_empty() {
        return Err(GatewayError::BadRequest("no updatable fields supplied".into()));
    }

    let modified = state
        .collection(collections::ROLES)
        .update_one(&query(&[("role_name", json!(role_name))]), &patch)
        .await?;
    if modified == 0 {
        return Err(GatewayError::RoleNotFound(role_name.clone()));
    }

    state.cache.invalidate(&keys::role(&role_name));
    Ok(ResponseEnvelope::success_message(200, "Role updated"))
}

pub async fn delete_role(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(role_name): Path<String>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_ROLES).await?;
    if role_name == "admin" {
        return Err(GatewayError::BadRequest("the admin role cannot be deleted".into()));
    }

    let deleted = state
        .collection(collections::ROLES)
        .delete_one(&query(&[("role_name", json!(role_name))]))
        .await?;
    if deleted == 0 {
        return Err(GatewayError::RoleNotFound(role_name.clone()));
    }

    state.cache.invalidate(&keys::role(&role_name));
    Ok(ResponseEnvelope::success_message(200, "Role deleted"))
}

pub async fn list_roles(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(page): Query<PageQuery>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_ROLES).await?;
    let (skip, limit) = page_params(&state.settings, &page)?;

    let roles = state
        .collection(collections::ROLES)
        .find(query(&[]))
        .skip(skip)
        .limit(limit)
        .to_list()
        .await?;
    Ok(ResponseEnvelope::success(200, json!({"roles": roles})))
}
