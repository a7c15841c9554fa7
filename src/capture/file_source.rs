//! Replays an existing audio file as if it were being recorded.
//!
//! The file is delivered in fixed-size chunks, one per timeslice, so the
//! session sees the same chunk stream a live device would produce.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::mime::mime_for_extension;
use super::{CaptureDevice, ChunkReceiver, DeviceAccessError};

pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Running,
    Paused,
    Stopped,
}

pub struct FileCaptureDevice {
    path: PathBuf,
    label: String,
    chunk_size: usize,
    timeslice: Duration,
    control: Option<watch::Sender<Control>>,
    task: Option<JoinHandle<()>>,
    finished_tx: watch::Sender<bool>,
}

impl FileCaptureDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let label = format!("file:{}", path.display());
        let (finished_tx, _) = watch::channel(false);

        Self {
            path,
            label,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeslice: Duration::ZERO,
            control: None,
            task: None,
            finished_tx,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Pace delivery like a live recorder. Zero delivers as fast as possible.
    pub fn with_timeslice(mut self, timeslice: Duration) -> Self {
        self.timeslice = timeslice;
        self
    }

    /// Flips to `true` once the whole file has been delivered.
    pub fn finished(&self) -> watch::Receiver<bool> {
        self.finished_tx.subscribe()
    }

    fn set_control(&self, control: Control) -> Result<()> {
        let sender = self
            .control
            .as_ref()
            .ok_or_else(|| anyhow!("{} is not capturing", self.label))?;
        sender.send_replace(control);
        Ok(())
    }
}

#[async_trait]
impl CaptureDevice for FileCaptureDevice {
    fn name(&self) -> &str {
        &self.label
    }

    async fn request_access(&mut self) -> std::result::Result<(), DeviceAccessError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(DeviceAccessError::Other(format!(
                "{} is not a regular file",
                self.path.display()
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(DeviceAccessError::NoDevice),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                Err(DeviceAccessError::PermissionDenied)
            }
            Err(e) => Err(DeviceAccessError::Other(e.to_string())),
        }
    }

    fn supported_mime_types(&self) -> Vec<String> {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(mime_for_extension)
            .map(|mime| vec![mime.to_string()])
            .unwrap_or_default()
    }

    fn start(&mut self, mime_type: &str) -> Result<ChunkReceiver> {
        if self.control.is_some() {
            return Err(anyhow!("{} is already capturing", self.label));
        }

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = watch::channel(Control::Running);
        self.finished_tx.send_replace(false);

        let task = tokio::spawn(replay(
            self.path.clone(),
            self.chunk_size,
            self.timeslice,
            chunk_tx,
            control_rx,
            self.finished_tx.clone(),
        ));

        self.control = Some(control_tx);
        self.task = Some(task);

        info!("Replaying {:?} as {}", self.path, mime_type);
        Ok(chunk_rx)
    }

    fn pause(&mut self) -> Result<()> {
        self.set_control(Control::Paused)
    }

    fn resume(&mut self) -> Result<()> {
        self.set_control(Control::Running)
    }

    fn stop(&mut self) -> Result<()> {
        let result = self.set_control(Control::Stopped);
        self.control = None;
        self.task = None;
        result
    }

    fn release(&mut self) {
        if let Some(control) = self.control.take() {
            control.send_replace(Control::Stopped);
        }
        self.task = None;
    }

    fn is_acquired(&self) -> bool {
        self.control.is_some()
    }
}

async fn replay(
    path: PathBuf,
    chunk_size: usize,
    timeslice: Duration,
    chunk_tx: mpsc::UnboundedSender<Vec<u8>>,
    mut control: watch::Receiver<Control>,
    finished: watch::Sender<bool>,
) {
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to read {:?} for replay: {}", path, e);
            finished.send_replace(true);
            return;
        }
    };

    let mut delivered = 0usize;
    for chunk in bytes.chunks(chunk_size) {
        loop {
            let state = *control.borrow_and_update();
            match state {
                Control::Running => break,
                Control::Stopped => {
                    debug!("Replay stopped after {} chunk(s)", delivered);
                    return;
                }
                Control::Paused => {
                    if control.changed().await.is_err() {
                        return;
                    }
                }
            }
        }

        if chunk_tx.send(chunk.to_vec()).is_err() {
            return;
        }
        delivered += 1;

        if !timeslice.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(timeslice) => {}
                changed = control.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    debug!("Replay of {:?} delivered {} chunk(s)", path, delivered);
    finished.send_replace(true);
}
