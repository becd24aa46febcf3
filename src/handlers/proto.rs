// ---------------------------------------------------------------------------
// /platform/proto — descriptor upload for the gRPC dispatcher
// ---------------------------------------------------------------------------

use axum::Extension;
use axum::extract::{Multipart, Path, State};
use serde_json::json;

use crate::auth::AuthContext;
use crate::envelope::{GatewayError, ResponseEnvelope};
use crate::permissions::{self, flags};
use crate::protoc;
use crate::state::AppState;

/// POST /platform/proto/{api_name}/{api_version} — multipart field `file`
/// holding a `.proto`; compiles via protoc and registers the descriptors.
pub async fn upload_proto(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((api_name, api_version)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Result<ResponseEnvelope, GatewayError> {
    permissions::require_permission(&state, &auth.username, flags::MANAGE_APIS).await?;

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .unwrap_or("upload.proto")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| GatewayError::BadRequest(format!("unreadable upload: {e}")))?;
        upload = Some((filename, data.to_vec()));
        break;
    }

    let (filename, content) =
        upload.ok_or_else(|| GatewayError::BadRequest("multipart field 'file' is required".into()))?;

    if !filename.to_lowercase().ends_with(".proto") {
        return Err(GatewayError::FileType("only .proto files are allowed".into()));
    }
    if content.len() > state.settings.max_multipart_size_bytes {
        return Err(GatewayError::BadRequest("uploaded file too large".into()));
    }

    let proto_root = match &state.settings.proto_root {
        Some(root) => std::path::PathBuf::from(root),
        None => std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir()),
    };

    let pool = protoc::compile_proto(&api_name, &api_version, &filename, &content, &proto_root)
        .await?;
    let services: Vec<String> = pool.services().map(|s| s.full_name().to_string()).collect();

    state.descriptors.insert(&api_name, &api_version, pool);
    tracing::info!(
        "proto descriptors registered for {}/{} ({} services)",
        api_name,
        api_version,
        services.len()
    );

    Ok(ResponseEnvelope::success(
        200,
        json!({"api_name": api_name, "api_version": api_version, "services": services}),
    ))
}
