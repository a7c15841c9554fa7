//! The recording session state machine and its controller.

pub mod controller;
pub mod error;
pub mod state;

pub use controller::{
    ControllerOptions, PersistenceHandle, PersistenceReport, RecordingController, SessionOutcome,
    SessionResult,
};
pub use error::{ErrorKind, SessionError};
pub use state::{EncodedBlob, SessionPhase, SessionState, SessionStatus, SessionStatusHandle};
