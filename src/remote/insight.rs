use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{http_failure, EntryPayload, Insight, InsightApi};

/// The backend answers either with the insight itself or wrapped in `data`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InsightEnvelope {
    Wrapped { data: Insight },
    Bare(Insight),
}

impl InsightEnvelope {
    fn into_insight(self) -> Insight {
        match self {
            InsightEnvelope::Wrapped { data } => data,
            InsightEnvelope::Bare(insight) => insight,
        }
    }
}

pub(crate) fn parse_insight(body: &str) -> Result<Insight> {
    let insight = serde_json::from_str::<InsightEnvelope>(body)
        .context("Failed to parse insight response")?
        .into_insight();
    insight.validate()?;
    Ok(insight)
}

pub struct HttpInsightClient {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl HttpInsightClient {
    pub fn new(
        base_url: &str,
        path: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build insight HTTP client")?;
        let endpoint = format!("{}{}", base_url.trim_end_matches('/'), path);

        info!("Initialized insight API with endpoint: {}", endpoint);

        Ok(Self {
            client,
            endpoint,
            access_token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl InsightApi for HttpInsightClient {
    fn name(&self) -> &'static str {
        "Insight API"
    }

    async fn submit(&self, payload: &EntryPayload) -> Result<Insight> {
        debug!("Requesting {} insight from {}", payload.kind.as_str(), self.endpoint);

        let mut request = self.client.post(&self.endpoint).json(payload);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("Failed to send request to insight API")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read insight response body")?;

        if !status.is_success() {
            error!("Insight API request failed with status {}: {}", status, body);
            return Err(http_failure(self.name(), status, &body));
        }

        let insight = parse_insight(&body)?;
        info!(
            "Insight received: {} {} ({} item(s))",
            insight.mood_emoji,
            insight.title,
            insight.insights.len()
        );
        Ok(insight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_and_bare() {
        let bare = parse_insight(r#"{"title":"Calma","moodEmoji":"🙂"}"#).unwrap();
        let wrapped = parse_insight(r#"{"data":{"title":"Calma","moodEmoji":"🙂"}}"#).unwrap();
        assert_eq!(bare, wrapped);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_insight(r#"{"answer":"hola"}"#).is_err());
        assert!(parse_insight(r#"{"title":"","moodEmoji":"🙂"}"#).is_err());
        assert!(parse_insight("not json").is_err());
    }

    #[test]
    fn test_endpoint_joins_path() {
        let client = HttpInsightClient::new(
            "https://api.example.com/",
            "/chat",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.endpoint(), "https://api.example.com/chat");
    }
}
