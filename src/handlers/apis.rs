// ---------------------------------------------------------------------------
// /platform/api — API onboarding CRUD
// ---------------------------------------------------------------------------

use axum::Extension;
use axum::extract::{Path, Query, State};
use serde_json::{Value, json};

use crate::auth::AuthContext;
use crate::cache::keys;
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::models::{ApiDoc, PageQuery};
use crate::permissions::{self, flags};
use crate::state::AppState;
use crate::store::{collections, query};

use super::page_params;

fn identity_query(name: &str, version: &str) -> crate::store::Query {
    query(&[("api_name", json!(name)), ("api_version", json!(version))])
}

pub async fn create_api(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::Json(body): axum::Json<ApiDoc>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_APIS).await?;

    if body.api_name.is_empty() || body.api_version.is_empty() {
        return Err(GatewayError::Validation("api_name and api_version are required".into()));
    }
    if body.active && body.api_servers.is_empty() {
        return Err(GatewayError::Validation(
            "an active API needs at least one server".into(),
        ));
    }

    let apis = state.collection(collections::APIS);
    if apis
        .find_one(&identity_query(&body.api_name, &body.api_version))
        .await?
        .is_some()
    {
        return Err(GatewayError::Conflict(format!(
            "API {}/{} already exists",
            body.api_name, body.api_version
        )));
    }

    let mut doc = serde_json::to_value(&body).unwrap_or_default();
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("created_at".into(), json!(chrono::Utc::now().to_rfc3339()));
    }
    apis.insert_one(doc).await?;

    Ok(ResponseEnvelope::success_message(201, "API created"))
}

pub async fn get_api(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((name, version)): Path<(String, String)>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_APIS).await?;
    let api = state
        .get_api(&name, &version)
        .await?
        .ok_or_else(|| GatewayError::ApiNotFound(format!("{name}/{version}")))?;
    Ok(ResponseEnvelope::success(200, api))
}

const UPDATABLE_FIELDS: &[&str] = &[
    "api_description",
    "api_type",
    "api_servers",
    "api_allowed_roles",
    "api_allowed_groups",
    "api_allowed_retry_count",
    "api_allowed_headers",
    "api_public",
    "active",
    "api_credit_group",
    "api_cors_allow_origins",
    "api_cors_allow_methods",
    "api_cors_allow_headers",
    "api_cors_allow_credentials",
    "api_cors_expose_headers",
];

pub async fn update_api(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((name, version)): Path<(String, String)>,
    axum::Json(body): axum::Json<Value>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_APIS).await?;

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
        .collection(collections::APIS)
        .update_one(&identity_query(&name, &version), &patch)
        .await?;
    if modified == 0 {
        return Err(GatewayError::ApiNotFound(format!("{name}/{version}")));
    }

    state.cache.invalidate(&keys::api(&name, &version));
    state
        .cache
        .invalidate_prefix(&format!("endpoint:{name}:{version}:"));
    Ok(ResponseEnvelope::success_message(200, "API updated"))
}

pub async fn delete_api(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((name, version)): Path<(String, String)>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_APIS).await?;

    let deleted = state
        .collection(collections::APIS)
        .delete_one(&identity_query(&name, &version))
        .await?;
    if deleted == 0 {
        return Err(GatewayError::ApiNotFound(format!("{name}/{version}")));
    }

    state.cache.invalidate(&keys::api(&name, &version));
    state
        .cache
        .invalidate_prefix(&format!("endpoint:{name}:{version}:"));
    Ok(ResponseEnvelope::success_message(200, "API deleted"))
}

pub async fn list_apis(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(page): Query<PageQuery>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_APIS).await?;
    let (skip, limit) = page_params(&state.settings, &page)?;

    let apis = state
        .collection(collections::APIS)
        .find(query(&[]))
        .skip(skip)
        .limit(limit)
        .to_list()
        .await?;

    Ok(ResponseEnvelope::success(200, json!({"apis": apis})))
}
