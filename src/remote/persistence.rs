use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error};

use super::{http_failure, EntryPayload, PersistenceApi};

/// Saves journal entries through the backend's journal endpoint.
pub struct HttpPersistenceClient {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl HttpPersistenceClient {
    pub fn new(
        base_url: &str,
        path: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build journal HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), path),
            access_token,
        })
    }
}

#[async_trait]
impl PersistenceApi for HttpPersistenceClient {
    fn name(&self) -> &'static str {
        "Journal API"
    }

    async fn submit(&self, payload: &EntryPayload) -> Result<()> {
        debug!("Saving {} entry to {}", payload.kind.as_str(), self.endpoint);

        let mut request = self.client.post(&self.endpoint).json(payload);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("Failed to send entry to journal API")?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!("Journal API rejected entry with status {}: {}", status, body);
        Err(http_failure(self.name(), status, &body))
    }
}
