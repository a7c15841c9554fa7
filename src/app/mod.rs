//! Wires configuration into a ready-to-use session controller.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::capture::{CaptureDevice, MicrophoneDevice};
use crate::config::Config;
use crate::profile::{ProfileClient, UserContext};
use crate::remote::{HttpInsightClient, HttpPersistenceClient, JournalClient, SupabaseStorage};
use crate::session::{ControllerOptions, PersistenceReport, RecordingController};

pub fn controller_options(config: &Config) -> ControllerOptions {
    ControllerOptions {
        mime_preferences: config.recording.mime_preferences.clone(),
        fallback_mime_type: config.recording.fallback_mime_type.clone(),
        request_timeout: config.api.request_timeout(),
        ..ControllerOptions::default()
    }
}

pub fn microphone_from_config(config: &Config) -> MicrophoneDevice {
    MicrophoneDevice::new(
        config.recording.device.clone(),
        config.recording.sample_rate,
        Duration::from_millis(config.recording.timeslice_ms.max(10)),
    )
}

/// Build a controller around `device` talking to the configured services.
pub fn build_controller(
    config: &Config,
    device: Box<dyn CaptureDevice>,
    context: UserContext,
) -> Result<RecordingController> {
    let timeout = config.api.request_timeout();

    let storage_key = config.storage.service_key.clone().unwrap_or_default();
    if storage_key.trim().is_empty() {
        warn!("No storage key configured; audio uploads will likely be rejected");
    }

    let storage = SupabaseStorage::new(
        &config.storage.url,
        &config.storage.bucket,
        &storage_key,
        timeout,
    )?;
    let insight = HttpInsightClient::new(
        &config.api.base_url,
        &config.api.insight_path,
        context.access_token.clone(),
        timeout,
    )?;
    let persistence = HttpPersistenceClient::new(
        &config.api.base_url,
        &config.api.journal_path,
        context.access_token.clone(),
        timeout,
    )?;

    info!(
        "Session controller ready for user {} using {}",
        context.user_id,
        device.name()
    );

    Ok(RecordingController::new(
        device,
        Arc::new(storage),
        Arc::new(insight),
        Arc::new(persistence),
        context,
    )
    .with_options(controller_options(config))
    .with_persistence_reports(spawn_report_monitor()))
}

pub fn build_profile_client(config: &Config, access_token: Option<String>) -> Result<ProfileClient> {
    let key = config
        .storage
        .service_key
        .as_deref()
        .filter(|key| !key.trim().is_empty())
        .context("Profile lookups need storage.service_key (or YOURNAL_STORAGE_KEY)")?;

    Ok(ProfileClient::new(
        &config.storage.url,
        key,
        config.retry.policy(),
        config.api.request_timeout(),
    )?
    .with_access_token(access_token))
}

pub fn build_journal_client(config: &Config, context: &UserContext) -> Result<JournalClient> {
    JournalClient::new(
        &config.api.base_url,
        &config.api.journal_path,
        context.access_token.clone(),
        config.retry.policy(),
        config.api.request_timeout(),
    )
}

/// Operator channel for background saves: failures end up in the log even
/// when nobody awaits the save.
fn spawn_report_monitor() -> mpsc::UnboundedSender<PersistenceReport> {
    let (tx, mut rx) = mpsc::unbounded_channel::<PersistenceReport>();
    tokio::spawn(async move {
        let mut failed = 0usize;
        while let Some(report) = rx.recv().await {
            if let Err(message) = &report.result {
                failed += 1;
                error!(
                    "Journal entry {} ({}) was not saved: {} [{} unsaved this run]",
                    report.session_id,
                    report.kind.as_str(),
                    message,
                    failed
                );
            }
        }
    });
    tx
}
