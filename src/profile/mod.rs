//! User identity and profile.
//!
//! `UserContext` is handed to the session controller explicitly; nothing
//! reads the current user from shared mutable state.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::UserConfig;
use crate::remote::http_failure;
use crate::retry::RetryPolicy;

/// Who entries are submitted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: String,
    pub access_token: Option<String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn from_config(user: &UserConfig) -> Result<Self> {
        let user_id = user
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .context("No user configured. Set user.user_id in the config file or YOURNAL_USER_ID")?;

        Ok(Self {
            user_id: user_id.to_string(),
            access_token: user.access_token.clone(),
        })
    }
}

/// Row of the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub auth_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "optional_age")]
    pub age: Option<u32>,
}

impl Profile {
    /// Name and age are collected on first use.
    pub fn needs_onboarding(&self) -> bool {
        let has_name = self
            .name
            .as_deref()
            .map(|n| !n.trim().is_empty())
            .unwrap_or(false);
        !has_name || self.age.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileValidationError {
    #[error("Please fill in every field")]
    MissingFields,

    #[error("Please enter a valid age between 1 and 120")]
    InvalidAge,
}

/// Raw onboarding form input.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: String,
    pub age: String,
}

/// Onboarding input that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidProfileUpdate {
    pub name: String,
    pub age: u32,
}

impl ProfileUpdate {
    pub fn new(name: impl Into<String>, age: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            age: age.into(),
        }
    }

    pub fn validate(&self) -> std::result::Result<ValidProfileUpdate, ProfileValidationError> {
        let name = self.name.trim();
        let age = self.age.trim();
        if name.is_empty() || age.is_empty() {
            return Err(ProfileValidationError::MissingFields);
        }

        match age.parse::<u32>() {
            Ok(age) if (1..=120).contains(&age) => Ok(ValidProfileUpdate {
                name: name.to_string(),
                age,
            }),
            _ => Err(ProfileValidationError::InvalidAge),
        }
    }
}

/// Reads and updates profiles through the Supabase REST interface.
pub struct ProfileClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    retry: RetryPolicy,
}

impl ProfileClient {
    pub fn new(base_url: &str, api_key: &str, retry: RetryPolicy, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build profile HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: None,
            retry,
        })
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    fn users_url(&self) -> String {
        format!("{}/rest/v1/users", self.base_url)
    }

    fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }

    /// Fetch the profile linked to an auth identity, retrying per policy.
    pub async fn fetch_by_auth_id(&self, auth_id: &str) -> Result<Profile> {
        let profile = self
            .retry
            .run("fetch user profile", move |attempt| {
                debug!("Fetching profile for {} (attempt {})", auth_id, attempt);
                self.fetch_once(auth_id)
            })
            .await
            .context("Failed to fetch user profile")?;

        info!("Loaded profile {}", profile.id);
        Ok(profile)
    }

    async fn fetch_once(&self, auth_id: &str) -> Result<Profile> {
        let filter = format!("eq.{}", auth_id);
        let response = self
            .client
            .get(self.users_url())
            .query(&[("auth_id", filter.as_str()), ("select", "*")])
            .header("apikey", &self.api_key)
            .bearer_auth(self.bearer())
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await
            .context("Failed to send profile request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read profile response body")?;

        if !status.is_success() {
            return Err(http_failure("Profile API", status, &body));
        }

        serde_json::from_str(&body).context("Failed to parse profile response")
    }

    /// Save onboarding data for a profile and return the stored row.
    pub async fn update(&self, profile_id: &str, update: &ValidProfileUpdate) -> Result<Profile> {
        let filter = format!("eq.{}", profile_id);
        let response = self
            .client
            .patch(self.users_url())
            .query(&[("id", filter.as_str())])
            .header("apikey", &self.api_key)
            .bearer_auth(self.bearer())
            .header("Accept", "application/vnd.pgrst.object+json")
            .header("Prefer", "return=representation")
            .json(update)
            .send()
            .await
            .context("Failed to send profile update")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read profile update response")?;

        if !status.is_success() {
            return Err(http_failure("Profile API", status, &body));
        }

        let profile: Profile =
            serde_json::from_str(&body).context("Failed to parse updated profile")?;
        info!("Profile {} updated", profile.id);
        Ok(profile)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Ages were stored as text by older clients.
fn optional_age<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("age out of range")),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(None),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(anyhow!("invalid age '{}'", s))),
        other => Err(serde::de::Error::custom(format!(
            "expected age, got {}",
            other
        ))),
    }
}
