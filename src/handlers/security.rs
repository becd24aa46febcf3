// ---------------------------------------------------------------------------
// /platform/security + /platform/memory — settings and encrypted snapshots
// ---------------------------------------------------------------------------

use axum::Extension;
use axum::extract::State;
use serde_json::{Value, json};

use crate::auth::AuthContext;
use crate::cache::keys;
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::models::MemoryRestoreRequest;
use crate::permissions::{self, flags};
use crate::state::AppState;
use crate::store::snapshot;
use crate::store::{collections, query};

pub async fn get_security_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_SECURITY).await?;
    let settings = state.security_settings().await;
    Ok(ResponseEnvelope::success(
        200,
        serde_json::to_value(settings).unwrap_or_default(),
    ))
}

pub async fn update_security_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::Json(body): axum::Json<Value>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_SECURITY).await?;

    let mut current = serde_json::to_value(state.security_settings().await).unwrap_or_default();
    let Some(patch) = body.as_object() else {
        return Err(GatewayError::Validation("settings body must be an object".into()));
    };
    if let Some(frequency) = patch
        .get("auto_save_frequency_seconds")
        .and_then(Value::as_u64)
    {
        if frequency < 60 {
            return Err(GatewayError::Validation(
                "auto_save_frequency_seconds must be >= 60".into(),
            ));
        }
    }
    if let Some(obj) = current.as_object_mut() {
        for (key, value) in patch {
            if obj.contains_key(key) {
                obj.insert(key.clone(), value.clone());
            }
        }
    }

    let coll = state.collection(collections::SECURITY_SETTINGS);
    if coll.find_one(&query(&[])).await?.is_some() {
        coll.replace_one(&query(&[]), current.clone()).await?;
    } else {
        coll.insert_one(current.clone()).await?;
    }

    state.cache.invalidate(&keys::security_settings());
    Ok(ResponseEnvelope::success(200, current))
}

/// POST /platform/memory/dump — memory mode only; writes the encrypted blob
/// and reports the path.
pub async fn memory_dump(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_SECURITY).await?;

    let Some(store) = state.store.memory() else {
        return Err(GatewayError::BadRequest(
            "memory dumps are only available in memory mode".into(),
        ));
    };

    let security = state.security_settings().await;
    let dump_path = security
        .dump_path
        .unwrap_or_else(|| state.settings.mem_dump_path.clone());

    let path = snapshot::dump_to_file(
        store,
        &dump_path,
        state.settings.mem_encryption_key.as_deref(),
    )
    .await?;

    Ok(ResponseEnvelope::success(
        200,
        json!({"path": path.to_string_lossy()}),
    ))
}

/// POST /platform/memory/restore — clears state and loads a dump; defaults
/// to the most recent file next to the configured dump path.
pub async fn memory_restore(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    axum::Json(body): axum::Json<MemoryRestoreRequest>,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_SECURITY).await?;

    let Some(store) = state.store.memory() else {
        return Err(GatewayError::BadRequest(
            "memory restore is only available in memory mode".into(),
        ));
    };

    let path = match body.path {
        Some(path) => std::path::PathBuf::from(path),
        None => {
            let base = std::path::Path::new(&state.settings.mem_dump_path);
            let dir = base.parent().unwrap_or_else(|| std::path::Path::new("."));
            snapshot::find_latest_dump_path(dir)
                .ok_or_else(|| GatewayError::NotFound("no dump file found".into()))?
        }
    };

    let collections = snapshot::restore_from_file(
        store,
        &path,
        state.settings.mem_encryption_key.as_deref(),
    )
    .await?;

    state.cache.clear();
    Ok(ResponseEnvelope::success(
        200,
        json!({"restored_collections": collections, "path": path.to_string_lossy()}),
    ))
}
