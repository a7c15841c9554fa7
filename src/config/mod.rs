use crate::capture::{DEFAULT_MIME_PREFERENCES, FALLBACK_MIME_TYPE};
use crate::global;
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Environment variable that overrides `storage.service_key`.
pub const STORAGE_KEY_ENV: &str = "YOURNAL_STORAGE_KEY";
/// Environment variable that overrides `user.user_id`.
pub const USER_ID_ENV: &str = "YOURNAL_USER_ID";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub recording: RecordingConfig,
    pub retry: RetryConfig,
    pub user: UserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the journaling backend (insight + journal endpoints)
    pub base_url: String,
    pub insight_path: String,
    pub journal_path: String,
    /// Upper bound for any single remote call
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Supabase project URL
    pub url: String,
    pub bucket: String,
    pub service_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Ordered mime preferences, first supported wins
    pub mime_preferences: Vec<String>,
    pub fallback_mime_type: String,
    pub sample_rate: u32,
    /// How often the capture device hands over a chunk
    pub timeslice_ms: u64,
    /// Input device name; default input device when unset
    pub device: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub user_id: Option<String>,
    pub access_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            insight_path: "/chat".to_string(),
            journal_path: "/journal".to_string(),
            request_timeout_seconds: 60,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            bucket: "audios".to_string(),
            service_key: None,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            mime_preferences: DEFAULT_MIME_PREFERENCES
                .iter()
                .map(|m| m.to_string())
                .collect(),
            fallback_mime_type: FALLBACK_MIME_TYPE.to_string(),
            sample_rate: 16000,
            timeslice_ms: 250,
            device: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config.with_env_overrides());
        }

        Ok(Self::load_from(&config_path)?.with_env_overrides())
    }

    /// Read a config file without creating it or applying env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        global::config_file()
    }

    fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(
            std::env::var(STORAGE_KEY_ENV).ok(),
            std::env::var(USER_ID_ENV).ok(),
        );
        self
    }

    fn apply_overrides(&mut self, storage_key: Option<String>, user_id: Option<String>) {
        if let Some(key) = storage_key.filter(|k| !k.trim().is_empty()) {
            self.storage.service_key = Some(key);
        }
        if let Some(id) = user_id.filter(|id| !id.trim().is_empty()) {
            self.user.user_id = Some(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_recording_preferences() {
        let config = Config::default();
        assert_eq!(config.recording.fallback_mime_type, "audio/webm");
        assert_eq!(
            config.recording.mime_preferences.first().map(String::as_str),
            Some("audio/webm;codecs=opus")
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [api]
            base_url = "https://journal.example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.api.base_url, "https://journal.example.com");
        assert_eq!(config.api.insight_path, "/chat");
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.storage.bucket, "audios");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.user.user_id = Some("user-42".to_string());
        config.recording.timeslice_ms = 500;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.user.user_id.as_deref(), Some("user-42"));
        assert_eq!(loaded.recording.timeslice_ms, 500);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "api = [not valid").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_overrides_ignore_blank_values() {
        let mut config = Config::default();
        config.storage.service_key = Some("from-file".to_string());

        config.apply_overrides(Some("  ".to_string()), Some("user-7".to_string()));

        assert_eq!(config.storage.service_key.as_deref(), Some("from-file"));
        assert_eq!(config.user.user_id.as_deref(), Some("user-7"));
    }

    #[test]
    fn test_request_timeout_never_zero() {
        let api = ApiConfig {
            request_timeout_seconds: 0,
            ..ApiConfig::default()
        };
        assert_eq!(api.request_timeout(), Duration::from_secs(1));
    }
}
