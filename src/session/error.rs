//! Classified session failures.
//!
//! Remote and device errors are mapped into one of these kinds at the point
//! of the call; raw transport errors never leave the controller.

use serde::{Deserialize, Serialize};

use super::state::SessionPhase;
use crate::capture::DeviceAccessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller asked for a transition the current phase does not allow
    Guard,
    DeviceAccess,
    Upload,
    Insight,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("cannot {action} while the session is {phase}")]
    InvalidTransition {
        action: &'static str,
        phase: SessionPhase,
    },

    #[error("nothing to submit: the entry is empty")]
    EmptyEntry,

    #[error(transparent)]
    DeviceAccess(#[from] DeviceAccessError),

    #[error("Upload failed: {0}. Your recording is kept, try sending it again.")]
    Upload(String),

    #[error("Insight unavailable: {0}")]
    InsightUnavailable(String),
}

impl SessionError {
    pub(crate) fn invalid(action: &'static str, phase: SessionPhase) -> Self {
        Self::InvalidTransition { action, phase }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTransition { .. } | Self::EmptyEntry => ErrorKind::Guard,
            Self::DeviceAccess(_) => ErrorKind::DeviceAccess,
            Self::Upload(_) => ErrorKind::Upload,
            Self::InsightUnavailable(_) => ErrorKind::Insight,
        }
    }

    /// Guard rejections are caller bugs, not something to show the user.
    pub fn is_user_facing(&self) -> bool {
        self.kind() != ErrorKind::Guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            SessionError::invalid("pause", SessionPhase::Idle).kind(),
            ErrorKind::Guard
        );
        assert_eq!(
            SessionError::from(DeviceAccessError::NoDevice).kind(),
            ErrorKind::DeviceAccess
        );
        assert_eq!(SessionError::Upload("x".into()).kind(), ErrorKind::Upload);
        assert_eq!(
            SessionError::InsightUnavailable("x".into()).kind(),
            ErrorKind::Insight
        );
    }

    #[test]
    fn test_messages() {
        let err = SessionError::invalid("pause", SessionPhase::Idle);
        assert_eq!(err.to_string(), "cannot pause while the session is idle");
        assert!(!err.is_user_facing());

        let err = SessionError::from(DeviceAccessError::PermissionDenied);
        assert_eq!(err.to_string(), DeviceAccessError::PermissionDenied.to_string());
        assert!(err.is_user_facing());

        let upload = SessionError::Upload("connection reset".into()).to_string();
        let insight = SessionError::InsightUnavailable("connection reset".into()).to_string();
        assert_ne!(upload, insight);
    }
}
