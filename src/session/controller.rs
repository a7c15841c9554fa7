//! Recording session orchestrator.
//!
//! Drives one journal entry at a time:
//! start → record/pause → stop → upload → insight (+ background save) → done
//!
//! Typed entries skip straight to the insight step. All collaborators are
//! injected through the constructor.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capture::{
    negotiate_with_fallback, CaptureDevice, ChunkReceiver, DeviceAccessError,
    DEFAULT_MIME_PREFERENCES, FALLBACK_MIME_TYPE,
};
use crate::profile::UserContext;
use crate::remote::{
    upload_name, EntryKind, EntryPayload, Insight, InsightApi, ObjectStorage, PersistenceApi,
};

use super::error::SessionError;
use super::state::{EncodedBlob, SessionPhase, SessionState, SessionStatus, SessionStatusHandle};

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Ordered encoding preferences; first one the device supports wins.
    pub mime_preferences: Vec<String>,
    pub fallback_mime_type: String,
    /// Upper bound for each remote call.
    pub request_timeout: Duration,
    /// How long `stop()` waits for the device to flush its last chunks.
    pub drain_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            mime_preferences: DEFAULT_MIME_PREFERENCES.iter().map(|m| m.to_string()).collect(),
            fallback_mime_type: FALLBACK_MIME_TYPE.to_string(),
            request_timeout: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of the background save of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceReport {
    pub session_id: Uuid,
    pub kind: EntryKind,
    pub result: Result<(), String>,
}

impl PersistenceReport {
    pub fn is_saved(&self) -> bool {
        self.result.is_ok()
    }
}

/// Background save still running after the insight came back.
#[derive(Debug)]
pub struct PersistenceHandle {
    session_id: Uuid,
    kind: EntryKind,
    handle: JoinHandle<PersistenceReport>,
}

impl PersistenceHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the save to settle.
    pub async fn wait(self) -> PersistenceReport {
        match self.handle.await {
            Ok(report) => report,
            Err(e) => PersistenceReport {
                session_id: self.session_id,
                kind: self.kind,
                result: Err(format!("persistence task ended unexpectedly: {}", e)),
            },
        }
    }
}

/// Returned when a session reaches `Complete`.
#[derive(Debug)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub insight: Insight,
    pub uploaded_reference: Option<String>,
    pub persistence: PersistenceHandle,
}

pub struct RecordingController {
    device: Box<dyn CaptureDevice>,
    storage: Arc<dyn ObjectStorage>,
    insight: Arc<dyn InsightApi>,
    persistence: Arc<dyn PersistenceApi>,
    context: UserContext,
    options: ControllerOptions,
    state: SessionState,
    session_id: Option<Uuid>,
    chunk_rx: Option<ChunkReceiver>,
    status: SessionStatusHandle,
    reports: Option<UnboundedSender<PersistenceReport>>,
    /// Save left running by a session that failed on the insight step.
    orphaned_persistence: Option<PersistenceHandle>,
}

impl RecordingController {
    pub fn new(
        device: Box<dyn CaptureDevice>,
        storage: Arc<dyn ObjectStorage>,
        insight: Arc<dyn InsightApi>,
        persistence: Arc<dyn PersistenceApi>,
        context: UserContext,
    ) -> Self {
        Self {
            device,
            storage,
            insight,
            persistence,
            context,
            options: ControllerOptions::default(),
            state: SessionState::Idle,
            session_id: None,
            chunk_rx: None,
            status: SessionStatusHandle::default(),
            reports: None,
            orphaned_persistence: None,
        }
    }

    pub fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_status_handle(mut self, status: SessionStatusHandle) -> Self {
        self.status = status;
        self
    }

    /// Send every background save outcome to an operator channel.
    pub fn with_persistence_reports(mut self, reports: UnboundedSender<PersistenceReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Acquire the device, negotiate the encoding and begin recording.
    /// Returns the negotiated mime type.
    pub async fn start(&mut self) -> SessionResult<String> {
        let phase = self.state.phase();
        if phase.is_in_flight() {
            return Err(SessionError::invalid("start", phase));
        }

        self.orphaned_persistence = None;
        self.chunk_rx = None;
        self.session_id = Some(Uuid::new_v4());
        self.set_state(SessionState::Requesting).await;
        info!("Requesting access to {}", self.device.name());

        if let Err(denied) = self.device.request_access().await {
            warn!("Access to {} failed: {}", self.device.name(), denied);
            self.device.release();
            return Err(self.fail(denied.into(), None, None).await);
        }

        let supported = self.device.supported_mime_types();
        let mime_type = negotiate_with_fallback(
            &self.options.mime_preferences,
            &supported,
            &self.options.fallback_mime_type,
        );
        debug!("Device supports {:?}, negotiated {}", supported, mime_type);

        match self.device.start(&mime_type) {
            Ok(rx) => {
                self.chunk_rx = Some(rx);
                self.set_state(SessionState::Recording {
                    mime_type: mime_type.clone(),
                    chunks: Vec::new(),
                })
                .await;
                info!("Recording started ({})", mime_type);
                Ok(mime_type)
            }
            Err(e) => {
                error!("Failed to start {}: {:#}", self.device.name(), e);
                self.device.release();
                Err(self.fail(access_error_from(&e).into(), None, None).await)
            }
        }
    }

    pub async fn pause(&mut self) -> SessionResult<()> {
        let (mime_type, mut chunks) = match std::mem::take(&mut self.state) {
            SessionState::Recording { mime_type, chunks } => (mime_type, chunks),
            other => return Err(self.reject("pause", other)),
        };

        if let Err(e) = self.device.pause() {
            return Err(self.device_failure("pause", e).await);
        }

        drain_pending(&mut self.chunk_rx, &mut chunks);
        info!("Recording paused after {} chunk(s)", chunks.len());
        self.set_state(SessionState::Paused { mime_type, chunks }).await;
        Ok(())
    }

    pub async fn resume(&mut self) -> SessionResult<()> {
        let (mime_type, mut chunks) = match std::mem::take(&mut self.state) {
            SessionState::Paused { mime_type, chunks } => (mime_type, chunks),
            other => return Err(self.reject("resume", other)),
        };

        drain_pending(&mut self.chunk_rx, &mut chunks);
        if let Err(e) = self.device.resume() {
            return Err(self.device_failure("resume", e).await);
        }

        info!("Recording resumed");
        self.set_state(SessionState::Recording { mime_type, chunks }).await;
        Ok(())
    }

    /// Pull chunks the device has delivered so far. Returns the running count.
    pub async fn poll_chunks(&mut self) -> usize {
        let received = match &mut self.state {
            SessionState::Recording { chunks, .. } => drain_pending(&mut self.chunk_rx, chunks),
            _ => 0,
        };

        if received > 0 {
            debug!("Received {} new chunk(s)", received);
            self.publish().await;
        }
        self.state.chunk_count()
    }

    /// Finalize the recording into one immutable blob and release the device.
    pub async fn stop(&mut self) -> SessionResult<EncodedBlob> {
        let (mime_type, mut chunks) = match std::mem::take(&mut self.state) {
            SessionState::Recording { mime_type, chunks }
            | SessionState::Paused { mime_type, chunks } => (mime_type, chunks),
            other => return Err(self.reject("stop", other)),
        };

        match self.device.stop() {
            Ok(()) => self.collect_remaining(&mut chunks).await,
            Err(e) => {
                warn!("Device did not stop cleanly: {:#}", e);
                drain_pending(&mut self.chunk_rx, &mut chunks);
            }
        }
        self.chunk_rx = None;
        self.device.release();

        let chunk_count = chunks.len();
        let blob = EncodedBlob::from_chunks(chunks, mime_type);
        info!(
            "Recording stopped: {} chunk(s), {} bytes ({})",
            chunk_count,
            blob.len(),
            blob.mime_type()
        );

        self.set_state(SessionState::Stopped { blob: blob.clone() }).await;
        Ok(blob)
    }

    /// Upload the finalized recording and request its insight.
    ///
    /// Also accepted after a failed upload: a new attempt starts with the
    /// blob that was already encoded.
    pub async fn submit(&mut self) -> SessionResult<SessionOutcome> {
        let (blob, retry) = match &self.state {
            SessionState::Stopped { blob } => (blob.clone(), false),
            SessionState::Failed {
                error: SessionError::Upload(_),
                blob: Some(blob),
                ..
            } => (blob.clone(), true),
            other => return Err(SessionError::invalid("submit", other.phase())),
        };

        if blob.is_empty() {
            return Err(SessionError::EmptyEntry);
        }

        if retry {
            let attempt = Uuid::new_v4();
            info!(
                "Retrying upload as attempt {} (previous {})",
                attempt,
                self.session_label()
            );
            self.session_id = Some(attempt);
            self.orphaned_persistence = None;
        }

        self.set_state(SessionState::Uploading { blob: blob.clone() }).await;

        let name = upload_name(blob.mime_type(), Utc::now());
        info!(
            "Uploading {} bytes to {} as {}",
            blob.len(),
            self.storage.name(),
            name
        );

        let upload = timeout(
            self.options.request_timeout,
            self.storage.upload(&name, blob.bytes(), blob.mime_type()),
        )
        .await;

        let reference = match upload {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => {
                error!("Upload to {} failed: {:#}", self.storage.name(), e);
                let err = SessionError::Upload(format!("{:#}", e));
                return Err(self.fail(err, Some(blob), None).await);
            }
            Err(_) => {
                let message = format!(
                    "{} did not respond within {:?}",
                    self.storage.name(),
                    self.options.request_timeout
                );
                error!("Upload timed out: {}", message);
                return Err(self.fail(SessionError::Upload(message), Some(blob), None).await);
            }
        };

        info!("Upload complete: {}", reference);
        let payload = EntryPayload::audio(&reference, blob.mime_type(), &self.context.user_id);
        self.await_insight(payload, Some(blob), Some(reference)).await
    }

    /// Submit a typed entry. Never touches the device or storage.
    pub async fn submit_text(&mut self, text: &str) -> SessionResult<SessionOutcome> {
        let phase = self.state.phase();
        if phase.is_in_flight() {
            return Err(SessionError::invalid("submit text", phase));
        }

        let content = text.trim();
        if content.is_empty() {
            return Err(SessionError::EmptyEntry);
        }

        self.orphaned_persistence = None;
        self.chunk_rx = None;
        self.session_id = Some(Uuid::new_v4());
        info!("Submitting text entry ({} chars)", content.chars().count());

        let payload = EntryPayload::text(content, &self.context.user_id);
        self.await_insight(payload, None, None).await
    }

    /// Drop the session from any state, releasing the device first.
    pub async fn discard(&mut self) {
        let phase = self.state.phase();

        self.chunk_rx = None;
        self.device.release();
        self.state = SessionState::Idle;
        self.session_id = None;
        self.status.reset().await;

        info!("Session discarded (was {})", phase);
    }

    /// Take the background save left behind by a failed insight call.
    pub fn take_orphaned_persistence(&mut self) -> Option<PersistenceHandle> {
        self.orphaned_persistence.take()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn insight(&self) -> Option<&Insight> {
        self.state.insight()
    }

    pub fn encoded_blob(&self) -> Option<&EncodedBlob> {
        self.state.blob()
    }

    pub fn uploaded_reference(&self) -> Option<&str> {
        self.state.uploaded_reference()
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.state.error()
    }

    pub fn chunk_count(&self) -> usize {
        self.state.chunk_count()
    }

    pub fn context(&self) -> &UserContext {
        &self.context
    }

    pub fn status_handle(&self) -> SessionStatusHandle {
        self.status.clone()
    }

    /// Fire the save, then wait on the insight only.
    async fn await_insight(
        &mut self,
        payload: EntryPayload,
        blob: Option<EncodedBlob>,
        uploaded_reference: Option<String>,
    ) -> SessionResult<SessionOutcome> {
        let session_id = *self.session_id.get_or_insert_with(Uuid::new_v4);

        self.set_state(SessionState::AwaitingInsight {
            payload: payload.clone(),
            blob: blob.clone(),
            uploaded_reference: uploaded_reference.clone(),
        })
        .await;

        let persistence = self.spawn_persistence(session_id, payload.clone());

        let result = timeout(self.options.request_timeout, self.insight.submit(&payload)).await;
        let failure = match result {
            Ok(Ok(insight)) => {
                info!(
                    "Session {} complete: {} {}",
                    session_id, insight.mood_emoji, insight.title
                );
                self.set_state(SessionState::Complete {
                    insight: insight.clone(),
                    blob,
                    uploaded_reference: uploaded_reference.clone(),
                })
                .await;

                return Ok(SessionOutcome {
                    session_id,
                    insight,
                    uploaded_reference,
                    persistence,
                });
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => format!(
                "{} did not respond within {:?}",
                self.insight.name(),
                self.options.request_timeout
            ),
        };

        error!("Insight for session {} failed: {}", session_id, failure);
        self.orphaned_persistence = Some(persistence);
        let err = SessionError::InsightUnavailable(failure);
        Err(self.fail(err, blob, uploaded_reference).await)
    }

    fn spawn_persistence(&self, session_id: Uuid, payload: EntryPayload) -> PersistenceHandle {
        let api = Arc::clone(&self.persistence);
        let reports = self.reports.clone();
        let limit = self.options.request_timeout;
        let kind = payload.kind;

        let handle = tokio::spawn(async move {
            let result = match timeout(limit, api.submit(&payload)).await {
                Ok(Ok(())) => {
                    info!("Entry for session {} saved by {}", session_id, api.name());
                    Ok(())
                }
                Ok(Err(e)) => {
                    error!(
                        "{} failed to save entry for session {}: {:#}",
                        api.name(),
                        session_id,
                        e
                    );
                    Err(format!("{:#}", e))
                }
                Err(_) => {
                    let message = format!(
                        "{} did not respond within {:?}",
                        api.name(),
                        limit
                    );
                    error!("Saving entry for session {} timed out: {}", session_id, message);
                    Err(message)
                }
            };

            let report = PersistenceReport {
                session_id,
                kind,
                result,
            };
            if let Some(reports) = reports {
                if reports.send(report.clone()).is_err() {
                    debug!("Persistence report channel closed");
                }
            }
            report
        });

        PersistenceHandle {
            session_id,
            kind,
            handle,
        }
    }

    /// Wait for the closed chunk stream to run dry.
    async fn collect_remaining(&mut self, chunks: &mut Vec<Vec<u8>>) {
        let Some(mut rx) = self.chunk_rx.take() else {
            return;
        };

        let drain = async {
            while let Some(chunk) = rx.recv().await {
                chunks.push(chunk);
            }
        };

        if timeout(self.options.drain_timeout, drain).await.is_err() {
            warn!(
                "{} kept the chunk stream open after stop; finalizing with {} chunk(s)",
                self.device.name(),
                chunks.len()
            );
        }
    }

    /// Restore a state taken for inspection and build the guard error.
    fn reject(&mut self, action: &'static str, state: SessionState) -> SessionError {
        let phase = state.phase();
        self.state = state;
        SessionError::invalid(action, phase)
    }

    async fn device_failure(&mut self, action: &str, e: anyhow::Error) -> SessionError {
        error!("Failed to {} {}: {:#}", action, self.device.name(), e);
        self.chunk_rx = None;
        self.device.release();
        self.fail(access_error_from(&e).into(), None, None).await
    }

    async fn fail(
        &mut self,
        error: SessionError,
        blob: Option<EncodedBlob>,
        uploaded_reference: Option<String>,
    ) -> SessionError {
        self.set_state(SessionState::Failed {
            error: error.clone(),
            blob,
            uploaded_reference,
        })
        .await;
        error
    }

    async fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.publish().await;
    }

    async fn publish(&self) {
        let status = SessionStatus::from_state(&self.state, self.session_id.map(|id| id.to_string()));
        self.status.publish(status).await;
    }

    fn session_label(&self) -> String {
        self.session_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string())
    }
}

/// Keep the cause a device already classified; anything else is `Other`.
fn access_error_from(e: &anyhow::Error) -> DeviceAccessError {
    e.downcast_ref::<DeviceAccessError>()
        .cloned()
        .unwrap_or_else(|| DeviceAccessError::Other(format!("{:#}", e)))
}

/// Move every chunk already waiting in the channel into `chunks`.
fn drain_pending(rx: &mut Option<ChunkReceiver>, chunks: &mut Vec<Vec<u8>>) -> usize {
    let Some(rx) = rx.as_mut() else {
        return 0;
    };

    let mut received = 0;
    while let Ok(chunk) = rx.try_recv() {
        chunks.push(chunk);
        received += 1;
    }
    received
}
