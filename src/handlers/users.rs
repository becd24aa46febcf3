// ---------------------------------------------------------------------------
// /platform/user — user CRUD (storage semantics; credentials never returned)
// ---------------------------------------------------------------------------

use axum::Extension;
use axum::extract::{Path, Query, State};
use serde_json::{Value, json};

use crate::auth::AuthContext;
use crate::cache::keys;
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::models::{CreateUserRequest, PageQuery, UpdatePasswordRequest};
use crate::permissions::{self, flags};
use crate::state::AppState;
use crate::store::{collections, query};

use super::{page_params, strip_credentials};

pub async fn create_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::Json(body): axum::Json<CreateUserRequest>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_USERS).await?;

    if body.groups.is_empty() {
        return Err(GatewayError::Validation("at least one group is required".into()));
    }
    if !crate::passwords::is_strong(&body.password) {
        return Err(GatewayError::Validation(
            "password must be >= 12 chars with upper, lower, digit and punctuation".into(),
        ));
    }
    if state.get_role(&body.role).await?.is_none() {
        return Err(GatewayError::NotFound(format!("role {}", body.role)));
    }
    for group in &body.groups {
        if state.get_group(group).await?.is_none() {
            return Err(GatewayError::NotFound(format!("group {group}")));
        }
    }

    let users = state.collection(collections::USERS);
    if users
        .find_one(&query(&[("username", json!(body.username))]))
        .await?
        .is_some()
    {
        return Err(GatewayError::Conflict(format!(
            "username {} already exists",
            body.username
        )));
    }
    if users
        .find_one(&query(&[("email", json!(body.email))]))
        .await?
        .is_some()
    {
        return Err(GatewayError::Conflict(format!(
            "email {} already exists",
            body.email
        )));
    }

    let hash = crate::passwords::hash(&body.password).await?;
    users
        .insert_one(json!({
            "username": body.username,
            "email": body.email,
            "password_hash": hash,
            "role": body.role,
            "groups": body.groups,
            "ui_access": body.ui_access,
            "active": body.active,
            "rate_limit_duration": body.rate_limit_duration,
            "rate_limit_duration_type": body.rate_limit_duration_type,
            "created_at": chrono::Utc::now().to_rfc3339(),
        }))
        .await?;

    Ok(ResponseEnvelope::success_message(201, "User created"))
}

pub async fn get_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<ResponseEnvelope, GatewayError> {
    let user = state
        .get_user(&auth.username)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("user {}", auth.username)))?;
    Ok(ResponseEnvelope::success(200, strip_credentials(user)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<ResponseEnvelope, GatewayError> {
    if auth.username != username {
        permissions::require_permission(&state, &auth.username, flags::MANAGE_USERS).await?;
    }
    let user = state
        .get_user(&username)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("user {username}")))?;
    Ok(ResponseEnvelope::success(200, strip_credentials(user)))
}

const UPDATABLE_FIELDS: &[&str] = &[
    "email",
    "role",
    "groups",
    "ui_access",
    "active",
    "rate_limit_duration",
    "rate_limit_duration_type",
    "throttle_duration",
    "throttle_duration_type",
    "custom_attributes",
];

pub async fn update_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
    axum::Json(body): axum::Json<Value>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_USERS).await?;

    let mut patch = query(&[]);
    if let Some(obj) = body.as_object() {
        for (key, value) in obj {
            if UPDATABLE_FIELDS.contains(&key.as_str()) {
                patch.insert(key.clone(), value.clone());
            }
        }
    }
    if patch.is_empty() {
        return Err(GatewayError::BadRequest("no updatable fields supplied".into()));
    }
    patch.insert("updated_at".into(), json!(chrono::Utc::now().to_rfc3339()));

    let modified = state
        .collection(collections::USERS)
        .update_one(&query(&[("username", json!(username))]), &patch)
        .await?;
    if modified == 0 {
        return Err(GatewayError::NotFound(format!("user {username}")));
    }

    state.cache.invalidate(&keys::user(&username));
    Ok(ResponseEnvelope::success_message(200, "User updated"))
}

pub async fn update_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
    axum::Json(body): axum::Json<UpdatePasswordRequest>,
) -> Result<ResponseEnvelope, GatewayError> {
    if auth.username != username {
        permissions::require_permission(&state, &auth.username, flags::MANAGE_USERS).await?;
    }

    let user = state
        .get_user(&username)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("user {username}")))?;

    let current_hash = user
        .get("password_hash")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !crate::passwords::verify(&body.old_password, current_hash).await? {
        return Err(GatewayError::Auth("old password does not match".into()));
    }
    if !crate::passwords::is_strong(&body.new_password) {
        return Err(GatewayError::Validation(
            "password must be >= 12 chars with upper, lower, digit and punctuation".into(),
        ));
    }

    let hash = crate::passwords::hash(&body.new_password).await?;
    state
        .collection(collections::USERS)
        .update_one(
            &query(&[("username", json!(username))]),
            &query(&[("password_hash", json!(hash))]),
        )
        .await?;

    state.cache.invalidate(&keys::user(&username));
    Ok(ResponseEnvelope::success_message(200, "Password updated"))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_USERS).await?;
    if username == "admin" {
        return Err(GatewayError::BadRequest("the admin account cannot be deleted".into()));
    }

    let deleted = state
        .collection(collections::USERS)
        .delete_one(&query(&[("username", json!(username))]))
        .await?;
    if deleted == 0 {
        return Err(GatewayError::NotFound(format!("user {username}")));
    }

    state.cache.invalidate(&keys::user(&username));
    state.cache.invalidate(&keys::subscriptions(&username));
    Ok(ResponseEnvelope::success_message(200, "User deleted"))
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(page): Query<PageQuery>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_USERS).await?;
    let (skip, limit) = page_params(&state.settings, &page)?;

    let users = state
        .collection(collections::USERS)
        .find(query(&[]))
        .skip(skip)
        .limit(limit)
        .to_list()
        .await?
        .into_iter()
        .map(strip_credentials)
        .collect::<Vec<_>>();

    Ok(ResponseEnvelope::success(200, json!({"users": users})))
}
