//! Remote collaborators: object storage, the insight API and the journal
//! persistence API, plus the read side of the journal for history.
//!
//! The session controller only sees the traits; the HTTP clients in the
//! submodules are wired up by `app`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod insight;
pub mod journal;
pub mod persistence;
pub mod storage;

pub use insight::HttpInsightClient;
pub use journal::{window_around, JournalClient, JournalDays};
pub use persistence::HttpPersistenceClient;
pub use storage::SupabaseStorage;

use crate::capture::extension_for;

/// Stores a binary object and returns a durable public URL for it.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn upload(&self, name: &str, bytes: &[u8], content_type: &str) -> Result<String>;
}

/// Produces a mood insight for a journal entry. May be slow.
#[async_trait]
pub trait InsightApi: Send + Sync {
    fn name(&self) -> &'static str;

    async fn submit(&self, payload: &EntryPayload) -> Result<Insight>;
}

/// Durably stores a journal entry. The caller never needs the response body.
#[async_trait]
pub trait PersistenceApi: Send + Sync {
    fn name(&self) -> &'static str;

    async fn submit(&self, payload: &EntryPayload) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Text,
    Audio,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Text => "text",
            EntryKind::Audio => "audio",
        }
    }
}

/// Body sent to both the insight and the persistence API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPayload {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Typed text, or the durable URL of the uploaded audio
    pub content: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EntryPayload {
    pub fn text(content: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Text,
            content: content.into(),
            user_id: user_id.into(),
            mime_type: None,
            created_at: Utc::now(),
        }
    }

    pub fn audio(url: impl Into<String>, mime_type: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Audio,
            content: url.into(),
            user_id: user_id.into(),
            mime_type: Some(mime_type.into()),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightItem {
    pub text: String,
    pub polarity: Polarity,
}

/// Structured mood summary returned by the insight API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub mood_emoji: String,
    #[serde(default)]
    pub insights: Vec<InsightItem>,
}

impl Insight {
    /// Reject responses that parsed but carry nothing to show.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(anyhow!("insight response has an empty title"));
        }
        if self.mood_emoji.trim().is_empty() {
            return Err(anyhow!("insight response has no mood emoji"));
        }
        Ok(())
    }
}

/// Collision-resistant object name: time-based with a random suffix.
pub fn upload_name(mime_type: &str, now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "audio_{}_{}.{}",
        now.timestamp_millis(),
        &suffix[..8],
        extension_for(mime_type)
    )
}

/// Build an error from a non-success HTTP response, preferring the
/// service's own message when the body carries one.
pub(crate) fn http_failure(service: &str, status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|m| m.as_str())
                .or_else(|| value.get("error").and_then(|e| e.as_str()))
                .or_else(|| {
                    value
                        .get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(|m| m.as_str())
                })
                .map(str::to_string)
        });

    match message {
        Some(message) => anyhow!("{} error ({}): {}", service, status, message),
        None => anyhow!("{} request failed with status {}: {}", service, status, body),
    }
}
