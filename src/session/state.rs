//! Session phases, per-phase data and the shared status handle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::error::{ErrorKind, SessionError};
use crate::remote::{EntryPayload, Insight};

/// Lifecycle phase of one capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Requesting,
    Recording,
    Paused,
    Stopped,
    Uploading,
    AwaitingInsight,
    Complete,
    Failed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Recording => "recording",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Uploading => "uploading",
            Self::AwaitingInsight => "awaiting_insight",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// The attempt is over; only a new session can follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// A session exists and has not reached a terminal phase.
    pub fn is_in_flight(&self) -> bool {
        !matches!(self, Self::Idle | Self::Complete | Self::Failed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finalized recording: the ordered concatenation of every chunk, tagged
/// with the negotiated encoding. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlob {
    bytes: Arc<[u8]>,
    mime_type: String,
}

impl EncodedBlob {
    pub fn from_chunks(chunks: Vec<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        let total = chunks.iter().map(Vec::len).sum();
        let mut bytes = Vec::with_capacity(total);
        for chunk in chunks {
            bytes.extend_from_slice(&chunk);
        }

        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Machine state. Each variant carries only the data that exists in that
/// phase, so combinations like "recording and paused" cannot be expressed.
#[derive(Debug, Clone)]
pub enum SessionState {
    Idle,
    Requesting,
    Recording {
        mime_type: String,
        chunks: Vec<Vec<u8>>,
    },
    Paused {
        mime_type: String,
        chunks: Vec<Vec<u8>>,
    },
    Stopped {
        blob: EncodedBlob,
    },
    Uploading {
        blob: EncodedBlob,
    },
    AwaitingInsight {
        payload: EntryPayload,
        blob: Option<EncodedBlob>,
        uploaded_reference: Option<String>,
    },
    Complete {
        insight: Insight,
        blob: Option<EncodedBlob>,
        uploaded_reference: Option<String>,
    },
    Failed {
        error: SessionError,
        blob: Option<EncodedBlob>,
        uploaded_reference: Option<String>,
    },
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            Self::Idle => SessionPhase::Idle,
            Self::Requesting => SessionPhase::Requesting,
            Self::Recording { .. } => SessionPhase::Recording,
            Self::Paused { .. } => SessionPhase::Paused,
            Self::Stopped { .. } => SessionPhase::Stopped,
            Self::Uploading { .. } => SessionPhase::Uploading,
            Self::AwaitingInsight { .. } => SessionPhase::AwaitingInsight,
            Self::Complete { .. } => SessionPhase::Complete,
            Self::Failed { .. } => SessionPhase::Failed,
        }
    }

    pub fn chunk_count(&self) -> usize {
        match self {
            Self::Recording { chunks, .. } | Self::Paused { chunks, .. } => chunks.len(),
            _ => 0,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::Recording { mime_type, .. } | Self::Paused { mime_type, .. } => {
                Some(mime_type.as_str())
            }
            _ => self.blob().map(EncodedBlob::mime_type),
        }
    }

    pub fn blob(&self) -> Option<&EncodedBlob> {
        match self {
            Self::Stopped { blob } | Self::Uploading { blob } => Some(blob),
            Self::AwaitingInsight { blob, .. }
            | Self::Complete { blob, .. }
            | Self::Failed { blob, .. } => blob.as_ref(),
            _ => None,
        }
    }

    pub fn uploaded_reference(&self) -> Option<&str> {
        match self {
            Self::AwaitingInsight {
                uploaded_reference, ..
            }
            | Self::Complete {
                uploaded_reference, ..
            }
            | Self::Failed {
                uploaded_reference, ..
            } => uploaded_reference.as_deref(),
            _ => None,
        }
    }

    pub fn insight(&self) -> Option<&Insight> {
        match self {
            Self::Complete { insight, .. } => Some(insight),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&SessionError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Snapshot of the controller, readable by observers while a call is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub session_id: Option<String>,
    pub chunk_count: usize,
    pub mime_type: Option<String>,
    pub uploaded_reference: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub last_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            session_id: None,
            chunk_count: 0,
            mime_type: None,
            uploaded_reference: None,
            error_kind: None,
            last_error: None,
        }
    }
}

impl SessionStatus {
    pub fn from_state(state: &SessionState, session_id: Option<String>) -> Self {
        Self {
            phase: state.phase(),
            session_id,
            chunk_count: state.chunk_count(),
            mime_type: state.mime_type().map(str::to_string),
            uploaded_reference: state.uploaded_reference().map(str::to_string),
            error_kind: state.error().map(SessionError::kind),
            last_error: state.error().map(|e| e.to_string()),
        }
    }
}

/// Thread-safe handle for sharing session status between the controller and its observers.
#[derive(Clone, Default)]
pub struct SessionStatusHandle {
    inner: Arc<Mutex<SessionStatus>>,
}

impl SessionStatusHandle {
    pub async fn get(&self) -> SessionStatus {
        self.inner.lock().await.clone()
    }

    pub async fn publish(&self, status: SessionStatus) {
        let mut current = self.inner.lock().await;
        *current = status;
    }

    pub async fn reset(&self) {
        let mut current = self.inner.lock().await;
        *current = SessionStatus::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_as_str() {
        assert_eq!(SessionPhase::Idle.as_str(), "idle");
        assert_eq!(SessionPhase::AwaitingInsight.as_str(), "awaiting_insight");
        assert_eq!(SessionPhase::Failed.to_string(), "failed");
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&SessionPhase::AwaitingInsight).unwrap();
        assert_eq!(json, "\"awaiting_insight\"");

        let parsed: SessionPhase = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(parsed, SessionPhase::Paused);
    }

    #[test]
    fn test_phase_classification() {
        assert!(SessionPhase::Complete.is_terminal());
        assert!(SessionPhase::Failed.is_terminal());
        assert!(!SessionPhase::Stopped.is_terminal());

        assert!(SessionPhase::Recording.is_in_flight());
        assert!(SessionPhase::Uploading.is_in_flight());
        assert!(!SessionPhase::Idle.is_in_flight());
        assert!(!SessionPhase::Complete.is_in_flight());
    }

    #[test]
    fn test_blob_concatenates_in_order() {
        let blob = EncodedBlob::from_chunks(
            vec![b"one-".to_vec(), Vec::new(), b"two-".to_vec(), b"three".to_vec()],
            "audio/webm",
        );
        assert_eq!(blob.bytes(), b"one-two-three");
        assert_eq!(blob.mime_type(), "audio/webm");
        assert_eq!(blob.len(), 13);

        let shared = blob.clone();
        assert_eq!(shared, blob);
    }

    #[test]
    fn test_state_accessors() {
        let state = SessionState::Paused {
            mime_type: "audio/ogg".to_string(),
            chunks: vec![vec![1], vec![2]],
        };
        assert_eq!(state.phase(), SessionPhase::Paused);
        assert_eq!(state.chunk_count(), 2);
        assert_eq!(state.mime_type(), Some("audio/ogg"));
        assert!(state.blob().is_none());

        let failed = SessionState::Failed {
            error: SessionError::Upload("network down".to_string()),
            blob: Some(EncodedBlob::from_chunks(vec![vec![9]], "audio/ogg")),
            uploaded_reference: None,
        };
        assert_eq!(failed.chunk_count(), 0);
        assert_eq!(failed.blob().map(EncodedBlob::len), Some(1));
        assert_eq!(failed.error().map(SessionError::kind), Some(ErrorKind::Upload));
    }

    #[tokio::test]
    async fn test_status_handle_publish_and_reset() {
        let handle = SessionStatusHandle::default();
        let state = SessionState::Recording {
            mime_type: "audio/webm".to_string(),
            chunks: vec![vec![0; 4]],
        };
        handle
            .publish(SessionStatus::from_state(&state, Some("abc".to_string())))
            .await;

        let status = handle.get().await;
        assert_eq!(status.phase, SessionPhase::Recording);
        assert_eq!(status.chunk_count, 1);
        assert_eq!(status.session_id.as_deref(), Some("abc"));

        handle.reset().await;
        assert_eq!(handle.get().await.phase, SessionPhase::Idle);
    }
}
