//! Cloudflare Images backend. The original system talks to this API with
//! bare HTTP calls rather than a dedicated SDK — there isn't a widely-used
//! Rust client for it either, so this backend does the same with `reqwest`
//! multipart, matching the source's own approach.

use crate::error::{AgentError, AgentResult};
use serde::Deserialize;

pub struct CfImagesBackend {
    account_id: String,
    api_token: String,
    delivery_domain: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CfImagesResponse {
    success: bool,
    result: Option<CfImagesResult>,
    errors: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct CfImagesResult {
    id: String,
    variants: Vec<String>,
}

impl CfImagesBackend {
    pub fn new(account_id: String, api_token: String, delivery_domain: Option<String>) -> Self {
        Self { account_id, api_token, delivery_domain, client: reqwest::Client::new() }
    }

    fn public_url(&self, image_id: &str, default_variant_url: Option<&str>) -> String {
        match &self.delivery_domain {
            Some(domain) => format!("{}/{}/public", domain.trim_end_matches('/'), image_id),
            None => default_variant_url.unwrap_or(image_id).to_string(),
        }
    }

    pub async fn upload_binary(&self, bytes: Vec<u8>, dest_path: &str, _content_type: Option<&str>) -> AgentResult<String> {
        let url = format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/images/v1",
            self.account_id
        );

        let filename = dest_path.rsplit('/').next().unwrap_or(dest_path).to_string();
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .multipart(form)
            .send()
            .await?;

        let body: CfImagesResponse = response
            .json()
            .await
            .map_err(|e| AgentError::StorageUpload(format!("cf images response unparsable: {e}")))?;

        if !body.success {
            return Err(AgentError::StorageUpload(format!("cf images upload rejected: {:?}", body.errors)));
        }
        let result = body
            .result
            .ok_or_else(|| AgentError::StorageUpload("cf images response missing result".into()))?;

        Ok(self.public_url(&result.id, result.variants.first().map(|s| s.as_str())))
    }
}
