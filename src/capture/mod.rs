//! Audio capture devices.
//!
//! A `CaptureDevice` hands out encoded audio as an ordered stream of chunks.
//! The session controller owns exactly one device and drives it through
//! access → start → pause/resume → stop, releasing it on discard.

pub mod file_source;
pub mod microphone;
pub mod mime;
pub mod wav;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use file_source::FileCaptureDevice;
pub use microphone::MicrophoneDevice;
pub use mime::{
    extension_for, mime_for_extension, negotiate, negotiate_with_fallback,
    DEFAULT_MIME_PREFERENCES, FALLBACK_MIME_TYPE,
};
pub use wav::{archive_path, is_pcm, write_pcm_wav};

/// Receiving half of a device's chunk stream, in delivery order.
pub type ChunkReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

/// Why the capture device could not be acquired.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceAccessError {
    #[error("Microphone access was denied. Allow microphone access and try again.")]
    PermissionDenied,

    #[error("No microphone was found. Connect an input device and try again.")]
    NoDevice,

    #[error("The microphone could not be started: {0}")]
    Other(String),
}

/// Only `request_access` is async. The control calls are expected to return
/// promptly, though hardware-backed devices may block for a bounded time.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Device name for logging.
    fn name(&self) -> &str;

    /// Ask the host for the input device. Suspends until granted or denied.
    async fn request_access(&mut self) -> std::result::Result<(), DeviceAccessError>;

    /// Encodings this device can produce, in no particular order.
    fn supported_mime_types(&self) -> Vec<String>;

    /// Begin capturing with the negotiated encoding.
    fn start(&mut self, mime_type: &str) -> Result<ChunkReceiver>;

    /// Suspend capture; nothing is delivered until `resume`.
    fn pause(&mut self) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    /// Finalize the stream. The sender side is dropped once every produced
    /// chunk is in the channel.
    fn stop(&mut self) -> Result<()>;

    /// Stop any active capture hardware. Safe to call repeatedly and in any state.
    fn release(&mut self);

    /// Whether the device currently holds the input (tracks live).
    fn is_acquired(&self) -> bool;
}
