// ---------------------------------------------------------------------------
// Proto descriptor pipeline for the gRPC dispatcher
// ---------------------------------------------------------------------------
// Uploaded .proto files compile to a FileDescriptorSet via protoc; the
// resulting descriptor pool drives dynamic unary calls. Target paths must
// stay inside the project root or the system temp directory.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use prost_reflect::DescriptorPool;

use crate::envelope::GatewayError;

/// Descriptor pools keyed by `"{api_name}:{api_version}"`.
pub struct DescriptorRegistry {
    pools: RwLock<HashMap<String, DescriptorPool>>,
}

impl DescriptorRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pools: RwLock::new(HashMap::new()),
        })
    }

    pub fn insert(&self, api_name: &str, api_version: &str, pool: DescriptorPool) {
        self.pools
            .write()
            .expect("descriptor lock poisoned")
            .insert(format!("{api_name}:{api_version}"), pool);
    }

    pub fn get(&self, api_name: &str, api_version: &str) -> Option<DescriptorPool> {
        self.pools
            .read()
            .expect("descriptor lock poisoned")
            .get(&format!("{api_name}:{api_version}"))
            .cloned()
    }
}

/// Lexically normalize a path: resolve `.` and `..` without touching the
/// filesystem, so traversal is caught before anything exists on disk.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// The target must lie within `root` or the system temp directory. The check
/// is component-wise (a common-path test), so `/root_extra` is rejected for
/// root `/root` even though it shares the string prefix.
pub fn validate_path(candidate: &Path, root: &Path) -> Result<PathBuf, GatewayError> {
    let absolute = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let normalized = normalize(&absolute);
    let root = normalize(root);
    let temp = normalize(&std::env::temp_dir());

    if normalized.starts_with(&root) || normalized.starts_with(&temp) {
        Ok(normalized)
    } else {
        Err(GatewayError::PathValidation(format!(
            "{} escapes the allowed directories",
            candidate.display()
        )))
    }
}

/// Write the uploaded proto and compile it into a descriptor pool.
pub async fn compile_proto(
    api_name: &str,
    api_version: &str,
    filename: &str,
    content: &[u8],
    proto_root: &Path,
) -> Result<DescriptorPool, GatewayError> {
    let proto_dir = validate_path(
        &proto_root.join("generated").join(format!("{api_name}_{api_version}")),
        proto_root,
    )?;
    let proto_path = validate_path(&proto_dir.join(filename), proto_root)?;
    let descriptor_path = proto_dir.join("descriptor.pb");

    tokio::fs::create_dir_all(&proto_dir)
        .await
        .map_err(|e| GatewayError::ProtoCompile(e.to_string()))?;
    tokio::fs::write(&proto_path, content)
        .await
        .map_err(|e| GatewayError::ProtoCompile(e.to_string()))?;

    let output = tokio::process::Command::new("protoc")
        .arg(format!("--descriptor_set_out={}", descriptor_path.display()))
        .arg("--include_imports")
        .arg("-I")
        .arg(&proto_dir)
        .arg(&proto_path)
        .output()
        .await
        .map_err(|e| GatewayError::ProtoCompile(format!("failed to invoke protoc: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GatewayError::ProtoCompile(stderr.trim().to_string()));
    }

    let bytes = tokio::fs::read(&descriptor_path)
        .await
        .map_err(|e| GatewayError::ProtoCompile(e.to_string()))?;
    DescriptorPool::decode(bytes.as_slice())
        .map_err(|e| GatewayError::ProtoCompile(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_inside_root_or_temp_pass() {
        let root = Path::new("/srv/doorman");
        assert!(validate_path(Path::new("generated/a_v1/s.proto"), root).is_ok());
        assert!(validate_path(&std::env::temp_dir().join("x.proto"), root).is_ok());
    }

    #[test]
    fn sibling_prefix_directories_are_rejected() {
        // commonpath semantics: /root vs /root_extra must be rejected.
        let root = Path::new("/root");
        assert!(validate_path(Path::new("/root_extra/s.proto"), root).is_err());
        assert!(validate_path(Path::new("/root/sub/s.proto"), root).is_ok());
    }

    #[test]
    fn traversal_components_are_resolved_before_the_check() {
        let root = Path::new("/srv/doorman");
        assert!(validate_path(Path::new("generated/../../../etc/passwd"), root).is_err());
        assert!(validate_path(Path::new("generated/./a/../b.proto"), root).is_ok());
    }
}
