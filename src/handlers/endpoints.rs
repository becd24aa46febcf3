// ---------------------------------------------------------------------------
// /platform/endpoint — endpoint CRUD under an onboarded API
// ---------------------------------------------------------------------------

use axum::Extension;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use crate::auth::AuthContext;
use crate::cache::keys;
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::models::EndpointDoc;
use crate::permissions::{self, flags};
use crate::state::AppState;
use crate::store::{collections, query};

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

fn identity_query(method: &str, name: &str, version: &str, uri: &str) -> crate::store::Query {
    query(&[
        ("api_name", json!(name)),
        ("api_version", json!(version)),
        ("endpoint_method", json!(method)),
        ("endpoint_uri", json!(uri)),
    ])
}

pub async fn create_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::Json(body): axum::Json<EndpointDoc>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_ENDPOINTS).await?;

    let method = body.endpoint_method.to_uppercase();
    if !HTTP_METHODS.contains(&method.as_str()) {
        return Err(GatewayError::Validation(format!(
            "endpoint_method must be one of {HTTP_METHODS:?}"
        )));
    }
    if !body.endpoint_uri.starts_with('/') {
        return Err(GatewayError::Validation("endpoint_uri must begin with /".into()));
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

    let endpoints = state.collection(collections::ENDPOINTS);
    if endpoints
        .find_one(&identity_query(
            &method,
            &body.api_name,
            &body.api_version,
            &body.endpoint_uri,
        ))
        .await?
        .is_some()
    {
        return Err(GatewayError::Conflict("endpoint already exists".into()));
    }

    let mut doc = serde_json::to_value(&body).unwrap_or_default();
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("endpoint_method".into(), json!(method));
        obj.insert("created_at".into(), json!(chrono::Utc::now().to_rfc3339()));
    }
    endpoints.insert_one(doc).await?;

    Ok(ResponseEnvelope::success_message(201, "Endpoint created"))
}

pub async fn get_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((method, name, version, uri)): Path<(String, String, String, String)>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_ENDPOINTS).await?;
    let uri = format!("/{uri}");
    let endpoint = state
        .get_endpoint(&name, &version, &method.to_uppercase(), &uri)
        .await?
        .ok_or_else(|| {
            GatewayError::EndpointNotFound(format!("{method} {name}/{version}{uri}"))
        })?;
    Ok(ResponseEnvelope::success(200, endpoint))
}

const UPDATABLE_FIELDS: &[&str] = &[
    "endpoint_description",
    "endpoint_servers",
    "validation_schema",
];

pub async fn update_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((method, name, version, uri)): Path<(String, String, String, String)>,
    axum::Json(body): axum::Json<Value>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_ENDPOINTS).await?;
    let method = method.to_uppercase();
    let uri = format!("/{uri}");

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
        .collection(collections::ENDPOINTS)
        .update_one(&identity_query(&method, &name, &version, &uri), &patch)
        .await?;
    if modified == 0 {
        return Err(GatewayError::EndpointNotFound(format!(
            "{method} {name}/{version}{uri}"
        )));
    }

    state
        .cache
        .invalidate(&keys::endpoint(&name, &version, &method, &uri));
    Ok(ResponseEnvelope::success_message(200, "Endpoint updated"))
}

pub async fn delete_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((method, name, version, uri)): Path<(String, String, String, String)>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_ENDPOINTS).await?;
    let method = method.to_uppercase();
    let uri = format!("/{uri}");

    let deleted = state
        .collection(collections::ENDPOINTS)
        .delete_one(&identity_query(&method, &name, &version, &uri))
        .await?;
    if deleted == 0 {
        return Err(GatewayError::EndpointNotFound(format!(
            "{method} {name}/{version}{uri}"
        )));
    }

    state
        .cache
        .invalidate(&keys::endpoint(&name, &version, &method, &uri));
    Ok(ResponseEnvelope::success_message(200, "Endpoint deleted"))
}

pub async fn list_endpoints(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((name, version)): Path<(String, String)>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_ENDPOINTS).await?;

    let endpoints = state
        .collection(collections::ENDPOINTS)
        .find(query(&[
            ("api_name", json!(name)),
            ("api_version", json!(version)),
        ]))
        .to_list()
        .await?;

    Ok(ResponseEnvelope::success(200, json!({"endpoints": endpoints})))
}
