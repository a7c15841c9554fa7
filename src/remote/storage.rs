use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{http_failure, ObjectStorage};

/// Supabase Storage bucket used for voice entries.
pub struct SupabaseStorage {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    api_key: String,
}

impl SupabaseStorage {
    pub fn new(base_url: &str, bucket: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build storage HTTP client")?;
        let base_url = base_url.trim_end_matches('/').to_string();

        info!(
            "Initialized Supabase storage at {} (bucket: {})",
            base_url, bucket
        );

        Ok(Self {
            client,
            base_url,
            bucket: bucket.to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn upload_url(&self, name: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, name)
    }

    pub fn public_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, name
        )
    }
}

#[async_trait]
impl ObjectStorage for SupabaseStorage {
    fn name(&self) -> &'static str {
        "Supabase Storage"
    }

    async fn upload(&self, name: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        debug!(
            "Uploading {} bytes to storage as {} ({})",
            bytes.len(),
            name,
            content_type
        );

        let response = self
            .client
            .post(self.upload_url(name))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes.to_vec())
            .send()
            .await
            .context("Failed to send upload to storage")?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .context("Failed to read upload response body")?;
            error!("Storage upload failed with status {}: {}", status, body);
            return Err(http_failure("Storage", status, &body));
        }

        let url = self.public_url(name);
        info!("Audio uploaded: {}", url);
        Ok(url)
    }
}
