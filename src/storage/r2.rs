//! Cloudflare R2 backend, an S3-compatible store reached with `aws-sdk-s3`
//! pointed at R2's custom endpoint, with a public-domain URL override.

use super::{chunk_size_for, content_type_for};
use crate::error::{AgentError, AgentResult};
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use once_cell::sync::OnceCell;

const LARGE_OBJECT_THRESHOLD: u64 = 100 * 1024 * 1024;

pub struct R2Backend {
    bucket: String,
    account_id: String,
    access_key: String,
    secret_key: String,
    public_domain: Option<String>,
    client: OnceCell<Client>,
}

impl R2Backend {
    pub fn new(
        bucket: String,
        account_id: String,
        access_key: String,
        secret_key: String,
        public_domain: Option<String>,
    ) -> Self {
        Self { bucket, account_id, access_key, secret_key, public_domain, client: OnceCell::new() }
    }

    fn client(&self) -> &Client {
        self.client.get_or_init(|| {
            let endpoint = format!("https://{}.r2.cloudflarestorage.com", self.account_id);
            let credentials = Credentials::new(&self.access_key, &self.secret_key, None, None, "r2-static");
            let config = aws_sdk_s3::Config::builder()
                .region(Region::new("auto"))
                .endpoint_url(endpoint)
                .credentials_provider(credentials)
                .behavior_version_latest()
                .build();
            Client::from_conf(config)
        })
    }

    fn public_url(&self, dest_path: &str) -> String {
        match &self.public_domain {
            Some(domain) => format!("{}/{}", domain.trim_end_matches('/'), dest_path),
            None => format!("https://{}.r2.cloudflarestorage.com/{}/{}", self.account_id, self.bucket, dest_path),
        }
    }

    pub async fn upload_binary(&self, bytes: Vec<u8>, dest_path: &str, content_type: Option<&str>) -> AgentResult<String> {
        let content_type = content_type.map(String::from).unwrap_or_else(|| content_type_for(dest_path));
        let byte_len = bytes.len() as u64;

        if byte_len > LARGE_OBJECT_THRESHOLD {
            self.upload_multipart(bytes, dest_path, &content_type).await?;
        } else {
            self.client()
                .put_object()
                .bucket(&self.bucket)
                .key(dest_path)
                .content_type(content_type)
                .body(ByteStream::from(bytes))
                .send()
                .await
                .map_err(|e| AgentError::StorageUpload(format!("r2 upload failed: {e}")))?;
        }
        Ok(self.public_url(dest_path))
    }

    /// Multipart upload for bodies above the large-object threshold, chunked
    /// per `chunk_size_for`: `create_multipart_upload`, a part-per-chunk
    /// `upload_part` loop collecting ETags, then `complete_multipart_upload`
    /// with the ordered part list.
    async fn upload_multipart(&self, bytes: Vec<u8>, dest_path: &str, content_type: &str) -> AgentResult<()> {
        let client = self.client();
        let create = client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(dest_path)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| AgentError::StorageUpload(format!("r2 multipart create failed: {e}")))?;
        let upload_id = create
            .upload_id()
            .ok_or_else(|| AgentError::StorageUpload("r2 multipart create returned no upload id".to_string()))?;

        let chunk_size = (chunk_size_for(bytes.len() as u64) as usize).max(1);
        let mut completed_parts = Vec::new();
        for (i, chunk) in bytes.chunks(chunk_size).enumerate() {
            let part_number = (i + 1) as i32;
            let part = client
                .upload_part()
                .bucket(&self.bucket)
                .key(dest_path)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| AgentError::StorageUpload(format!("r2 multipart part {part_number} failed: {e}")))?;
            completed_parts.push(
                CompletedPart::builder()
                    .e_tag(part.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );
        }

        client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(dest_path)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| AgentError::StorageUpload(format!("r2 multipart complete failed: {e}")))?;

        Ok(())
    }
}
