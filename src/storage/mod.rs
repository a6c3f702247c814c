//! Storage Uploader — uniform operations over configured cloud
//! backends. Modelled as a sum type of concrete backend variants (same
//! pattern as the Node Registry) rather than a trait object: the backend
//! set is small and fixed, and `match`ing keeps each backend's real SDK
//! types (not a boxed-future trait) in scope.

pub mod cf_images;
pub mod gcs;
pub mod r2;

use crate::error::{AgentError, AgentResult};

/// Large uploads use chunked/resumable transfer: 64 MiB chunks up to 1 GiB,
/// 256 MiB beyond.
pub fn chunk_size_for(byte_len: u64) -> u64 {
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * MIB;
    if byte_len > GIB {
        256 * MIB
    } else if byte_len > 100 * MIB {
        64 * MIB
    } else {
        byte_len.max(1)
    }
}

pub fn content_type_for(dest_path: &str) -> String {
    mime_guess::from_path(dest_path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub enum Backend {
    Gcs(gcs::GcsBackend),
    R2(r2::R2Backend),
    CfImages(cf_images::CfImagesBackend),
}

impl Backend {
    pub async fn upload_binary(&self, bytes: Vec<u8>, dest_path: &str, content_type: Option<&str>) -> AgentResult<String> {
        match self {
            Backend::Gcs(b) => b.upload_binary(bytes, dest_path, content_type).await,
            Backend::R2(b) => b.upload_binary(bytes, dest_path, content_type).await,
            Backend::CfImages(b) => b.upload_binary(bytes, dest_path, content_type).await,
        }
    }

    pub async fn upload_file(&self, path: &std::path::Path, dest_path: &str) -> AgentResult<String> {
        let bytes = tokio::fs::read(path).await?;
        let content_type = content_type_for(dest_path);
        let url = self.upload_binary(bytes, dest_path, Some(&content_type)).await?;
        tokio::fs::remove_file(path).await.ok();
        Ok(url)
    }

    pub async fn upload_base64(&self, data: &str, dest_path: &str) -> AgentResult<String> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| AgentError::StorageUpload(format!("invalid base64 payload: {e}")))?;
        self.upload_binary(bytes, dest_path, None).await
    }
}

/// Owns the set of registered backends and the default one, built from
/// configuration at startup. Registration follows which backend's
/// required env vars are present, mirroring the original system's
/// `_configure_*` probing.
pub struct StorageManager {
    backends: Vec<(String, Backend)>,
    default: Option<String>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self { backends: Vec::new(), default: None }
    }

    pub fn register(&mut self, name: &str, backend: Backend, is_default: bool) {
        println!("📦 storage backend registered: {name}");
        self.backends.push((name.to_string(), backend));
        if is_default || self.default.is_none() {
            self.default = Some(name.to_string());
        }
    }

    pub fn is_initialized(&self) -> bool {
        !self.backends.is_empty()
    }

    fn get(&self, name: Option<&str>) -> AgentResult<&Backend> {
        let target = name.or(self.default.as_deref());
        let target = target.ok_or(AgentError::NoStorageConfigured)?;
        self.backends
            .iter()
            .find(|(n, _)| n == target)
            .map(|(_, b)| b)
            .ok_or_else(|| AgentError::StorageBackendMissing(target.to_string()))
    }

    pub async fn upload_binary(&self, bytes: Vec<u8>, dest_path: &str, content_type: Option<&str>) -> AgentResult<String> {
        self.get(None)?.upload_binary(bytes, dest_path, content_type).await
    }

    pub async fn upload_file(&self, path: &std::path::Path, dest_path: &str) -> AgentResult<String> {
        self.get(None)?.upload_file(path, dest_path).await
    }

    pub async fn upload_base64(&self, data: &str, dest_path: &str) -> AgentResult<String> {
        self.get(None)?.upload_base64(data, dest_path).await
    }

    /// Build from process configuration, registering whichever backends
    /// have their required env vars present. `STORAGE_PROVIDER` names the
    /// default when more than one is configured.
    pub fn from_config() -> Self {
        let mut manager = Self::new();
        let selector = crate::config::STORAGE_PROVIDER.as_str();

        if selector == "gcs" || crate::config::GCS_BUCKET_NAME.is_some() {
            if let Some(bucket) = crate::config::GCS_BUCKET_NAME.clone() {
                let backend = gcs::GcsBackend::new(bucket, crate::config::CDN_URL.clone());
                manager.register("gcs", Backend::Gcs(backend), selector == "gcs");
            } else {
                println!("⚠ GCS selected but GCS_BUCKET_NAME not set, skipping");
            }
        }

        if selector == "r2" || crate::config::R2_BUCKET_NAME.is_some() {
            match (
                crate::config::R2_BUCKET_NAME.clone(),
                crate::config::R2_ACCOUNT_ID.clone(),
                crate::config::R2_ACCESS_KEY.clone(),
                crate::config::R2_SECRET_KEY.clone(),
            ) {
                (Some(bucket), Some(account_id), Some(access_key), Some(secret_key)) => {
                    let backend = r2::R2Backend::new(
                        bucket,
                        account_id,
                        access_key,
                        secret_key,
                        crate::config::R2_PUBLIC_DOMAIN.clone(),
                    );
                    manager.register("r2", Backend::R2(backend), selector == "r2");
                }
                _ => println!("⚠ R2 configuration incomplete, skipping R2 backend"),
            }
        }

        if selector == "cf_images" || crate::config::CF_IMAGES_ACCOUNT_ID.is_some() {
            match (
                crate::config::CF_IMAGES_ACCOUNT_ID.clone(),
                crate::config::CF_IMAGES_API_TOKEN.clone(),
            ) {
                (Some(account_id), Some(api_token)) => {
                    let backend = cf_images::CfImagesBackend::new(
                        account_id,
                        api_token,
                        crate::config::CF_IMAGES_DELIVERY_DOMAIN.clone(),
                    );
                    manager.register("cf_images", Backend::CfImages(backend), selector == "cf_images");
                }
                _ => println!("⚠ Cloudflare Images configuration incomplete, skipping"),
            }
        }

        if !manager.is_initialized() {
            println!("⚠ no storage backends configured, uploads will fail");
        }

        manager
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_thresholds() {
        const MIB: u64 = 1024 * 1024;
        const GIB: u64 = 1024 * MIB;
        assert_eq!(chunk_size_for(10 * MIB), 10 * MIB);
        assert_eq!(chunk_size_for(200 * MIB), 64 * MIB);
        assert_eq!(chunk_size_for(2 * GIB), 256 * MIB);
    }

    #[test]
    fn content_type_inferred_from_extension() {
        assert_eq!(content_type_for("20260101/t1_0.png"), "image/png");
        assert_eq!(content_type_for("20260101/t1_0.mp4"), "video/mp4");
        assert_eq!(content_type_for("20260101/t1_0.unknownext"), "application/octet-stream");
    }
}
