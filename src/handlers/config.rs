// ---------------------------------------------------------------------------
// /platform/config — full configuration export/import
// ---------------------------------------------------------------------------
// Export serializes every config section; import upserts by natural identity
// and tolerates malformed entries, so export -> clear -> import -> re-export
// keeps the per-section counts stable.

use axum::Extension;
use axum::extract::State;
use serde_json::{Map, Value, json};

use crate::auth::AuthContext;
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::permissions::{self, flags};
use crate::state::AppState;
use crate::store::{Query, collections, query};

/// Section name -> natural identity fields.
const SECTIONS: &[(&str, &[&str])] = &[
    (collections::APIS, &["api_name", "api_version"]),
    (
        collections::ENDPOINTS,
        &["api_name", "api_version", "endpoint_method", "endpoint_uri"],
    ),
    (collections::USERS, &["username"]),
    (collections::ROLES, &["role_name"]),
    (collections::GROUPS, &["group_name"]),
    (collections::SUBSCRIPTIONS, &["username"]),
    (collections::ROUTINGS, &["client_key"]),
    (collections::CREDIT_DEFS, &["api_credit_group"]),
    (collections::USER_CREDITS, &["username"]),
];

/// GET /platform/config/export/all
pub async fn export_all(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_GATEWAY).await?;

    let mut out = Map::new();
    for (section, _) in SECTIONS {
        let docs = state
            .collection(section)
            .find(query(&[]))
            .to_list()
            .await?;
        out.insert((*section).to_string(), Value::Array(docs));
    }
    if let Some(settings) = state
        .collection(collections::SECURITY_SETTINGS)
        .find_one(&query(&[]))
        .await?
    {
        out.insert(collections::SECURITY_SETTINGS.to_string(), settings);
    }

    Ok(ResponseEnvelope::success(200, Value::Object(out)))
}

/// POST /platform/config/import
pub async fn import_all(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::Json(body): axum::Json<Value>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_GATEWAY).await?;

    let Some(payload) = body.as_object() else {
        return Err(GatewayError::Validation("import payload must be an object".into()));
    };

    let mut imported = Map::new();
    for (section, identity) in SECTIONS {
        let Some(docs) = payload.get(*section).and_then(Value::as_array) else {
            continue;
        };
        let mut count = 0u64;
        for doc in docs {
            if upsert(&state, section, identity, doc).await? {
                count += 1;
            }
        }
        imported.insert((*section).to_string(), json!(count));
    }

    if let Some(settings) = payload.get(collections::SECURITY_SETTINGS) {
        if settings.is_object() {
            let coll = state.collection(collections::SECURITY_SETTINGS);
            if coll.find_one(&query(&[])).await?.is_some() {
                coll.replace_one(&query(&[]), settings.clone()).await?;
            } else {
                coll.insert_one(settings.clone()).await?;
            }
            imported.insert(collections::SECURITY_SETTINGS.to_string(), json!(1));
        }
    }

    state.cache.clear();
    Ok(ResponseEnvelope::success(
        200,
        json!({"imported": Value::Object(imported)}),
    ))
}

/// Upsert one document by its natural identity. Entries missing an identity
/// field are skipped rather than failing the whole import.
async fn upsert(
    state: &AppState,
    section: &str,
    identity: &[&str],
    doc: &Value,
) -> Result<bool, GatewayError> {
    let Some(obj) = doc.as_object() else {
        return Ok(false);
    };

    let mut identity_query = Query::new();
    for field in identity {
        match obj.get(*field) {
            Some(value) if !value.is_null() => {
                identity_query.insert((*field).to_string(), value.clone());
            }
            _ => return Ok(false),
        }
    }

    let coll = state.collection(section);
    if coll.find_one(&identity_query).await?.is_some() {
        coll.replace_one(&identity_query, doc.clone()).await?;
    } else {
        coll.insert_one(doc.clone()).await?;
    }
    Ok(true)
}
