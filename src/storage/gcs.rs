//! Google Cloud Storage backend, with CDN-URL override.

use super::{chunk_size_for, content_type_for};
use crate::error::{AgentError, AgentResult};
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use once_cell::sync::OnceCell;

const LARGE_OBJECT_THRESHOLD: u64 = 100 * 1024 * 1024;

pub struct GcsBackend {
    bucket: String,
    cdn_url: Option<String>,
    client: OnceCell<Client>,
    http: reqwest::Client,
}

impl GcsBackend {
    pub fn new(bucket: String, cdn_url: Option<String>) -> Self {
        Self { bucket, cdn_url, client: OnceCell::new(), http: reqwest::Client::new() }
    }

    async fn client(&self) -> AgentResult<&Client> {
        if let Some(c) = self.client.get() {
            return Ok(c);
        }
        let config = ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| AgentError::StorageUpload(format!("gcs auth failed: {e}")))?;
        let client = Client::new(config);
        Ok(self.client.get_or_init(|| client))
    }

    fn public_url(&self, dest_path: &str) -> String {
        match &self.cdn_url {
            Some(cdn) => format!("{}/{}", cdn.trim_end_matches('/'), dest_path),
            None => format!("https://storage.googleapis.com/{}/{}", self.bucket, dest_path),
        }
    }

    pub async fn upload_binary(&self, bytes: Vec<u8>, dest_path: &str, content_type: Option<&str>) -> AgentResult<String> {
        let content_type = content_type.map(String::from).unwrap_or_else(|| content_type_for(dest_path));
        let byte_len = bytes.len() as u64;
        let client = self.client().await?;

        if byte_len > LARGE_OBJECT_THRESHOLD {
            self.upload_resumable(client, bytes, dest_path, &content_type).await?;
        } else {
            let upload_type = UploadType::Simple(Media {
                name: dest_path.to_string().into(),
                content_type: content_type.into(),
                content_length: Some(byte_len),
            });

            client
                .upload_object(
                    &UploadObjectRequest {
                        bucket: self.bucket.clone(),
                        ..Default::default()
                    },
                    bytes,
                    &upload_type,
                )
                .await
                .map_err(|e| AgentError::StorageUpload(format!("gcs upload failed: {e}")))?;
        }

        Ok(self.public_url(dest_path))
    }

    /// Resumable upload for bodies above the large-object threshold: opens a
    /// session then PUTs the body in `chunk_size_for`-sized pieces, each
    /// carrying a `Content-Range` header, per the GCS resumable protocol.
    /// Intermediate chunks expect a `308 Resume Incomplete`; the final chunk
    /// expects success.
    async fn upload_resumable(
        &self,
        client: &Client,
        bytes: Vec<u8>,
        dest_path: &str,
        content_type: &str,
    ) -> AgentResult<()> {
        let total = bytes.len() as u64;
        let media = Media {
            name: dest_path.to_string().into(),
            content_type: content_type.to_string().into(),
            content_length: Some(total),
        };
        let session_url = client
            .prepare_resumable_upload(
                &UploadObjectRequest {
                    bucket: self.bucket.clone(),
                    ..Default::default()
                },
                &media,
            )
            .await
            .map_err(|e| AgentError::StorageUpload(format!("gcs resumable session failed: {e}")))?;

        let chunk_size = chunk_size_for(total);
        let mut offset = 0u64;
        while offset < total {
            let end = (offset + chunk_size).min(total);
            let chunk = bytes[offset as usize..end as usize].to_vec();
            let content_range = format!("bytes {offset}-{}/{total}", end - 1);
            let is_final = end == total;

            let response = self
                .http
                .put(&session_url)
                .header("Content-Range", content_range)
                .body(chunk)
                .send()
                .await
                .map_err(|e| AgentError::StorageUpload(format!("gcs resumable chunk upload failed: {e}")))?;

            let status = response.status().as_u16();
            if is_final {
                if !response.status().is_success() {
                    return Err(AgentError::StorageUpload(format!(
                        "gcs resumable upload finished with unexpected status {status}"
                    )));
                }
            } else if status != 308 {
                return Err(AgentError::StorageUpload(format!(
                    "gcs resumable upload chunk rejected with status {status}"
                )));
            }

            offset = end;
        }
        Ok(())
    }
}
