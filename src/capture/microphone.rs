//! Microphone capture via cpal.
//!
//! cpal streams are not `Send`, so a worker thread owns the stream and takes
//! commands over a std channel. The stream is opened with a single channel;
//! samples are converted to 16-bit little-endian PCM and handed over as one
//! chunk per timeslice.
//!
//! `start`, `pause`, `resume` and `stop` block the calling thread while the
//! worker acknowledges, bounded by `WORKER_STARTUP_TIMEOUT` and
//! `COMMAND_ACK_TIMEOUT`. `stop` also joins the worker after it has flushed.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{CaptureDevice, ChunkReceiver, DeviceAccessError};

const WORKER_STARTUP_TIMEOUT: Duration = Duration::from_secs(2);
const COMMAND_ACK_TIMEOUT: Duration = Duration::from_secs(3);

enum Cmd {
    Pause(std_mpsc::Sender<()>),
    Resume(std_mpsc::Sender<()>),
    Stop(std_mpsc::Sender<()>),
}

enum WorkerMsg {
    Ready,
    Failed(DeviceAccessError),
}

pub struct MicrophoneDevice {
    device_name: Option<String>,
    sample_rate: u32,
    timeslice: Duration,
    label: String,
    cmd_tx: Option<std_mpsc::Sender<Cmd>>,
    worker: Option<JoinHandle<()>>,
}

impl MicrophoneDevice {
    /// Create a microphone device.
    ///
    /// # Arguments
    /// * `device_name` - Input device to use; the default input device when `None`
    /// * `sample_rate` - Capture rate in Hz (16000 keeps uploads small)
    /// * `timeslice` - How much audio each delivered chunk covers
    pub fn new(device_name: Option<String>, sample_rate: u32, timeslice: Duration) -> Self {
        let label = device_name
            .clone()
            .unwrap_or_else(|| "default microphone".to_string());

        Self {
            device_name,
            sample_rate,
            timeslice,
            label,
            cmd_tx: None,
            worker: None,
        }
    }

    /// The single encoding this device produces.
    pub fn pcm_mime_type(&self) -> String {
        format!("audio/l16;rate={};channels=1", self.sample_rate)
    }

    fn send_and_wait(&self, make: impl FnOnce(std_mpsc::Sender<()>) -> Cmd) -> Result<()> {
        let cmd_tx = self
            .cmd_tx
            .as_ref()
            .ok_or_else(|| anyhow!("Microphone is not capturing"))?;

        let (ack_tx, ack_rx) = std_mpsc::channel();
        cmd_tx
            .send(make(ack_tx))
            .map_err(|_| anyhow!("Microphone worker is gone"))?;

        ack_rx
            .recv_timeout(COMMAND_ACK_TIMEOUT)
            .context("Microphone worker did not acknowledge command")
    }
}

#[async_trait]
impl CaptureDevice for MicrophoneDevice {
    fn name(&self) -> &str {
        &self.label
    }

    async fn request_access(&mut self) -> std::result::Result<(), DeviceAccessError> {
        let device_name = self.device_name.clone();
        let lookup = tokio::task::spawn_blocking(move || -> std::result::Result<String, DeviceAccessError> {
            let device = find_input_device(device_name.as_deref())?;
            device
                .default_input_config()
                .map_err(|e| classify_device_error(&e.to_string()))?;
            Ok(device.name().unwrap_or_else(|_| "unknown".to_string()))
        })
        .await
        .map_err(|e| DeviceAccessError::Other(format!("device lookup panicked: {e}")))?;

        let name = lookup?;
        info!("Microphone access granted: {}", name);
        Ok(())
    }

    fn supported_mime_types(&self) -> Vec<String> {
        vec![self.pcm_mime_type()]
    }

    fn start(&mut self, mime_type: &str) -> Result<ChunkReceiver> {
        if self.cmd_tx.is_some() {
            return Err(anyhow!("Microphone already capturing"));
        }
        if !mime_type.to_ascii_lowercase().starts_with("audio/l16") {
            warn!(
                "Microphone produces raw PCM; requested encoding {} is not available",
                mime_type
            );
        }

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = std_mpsc::channel::<Cmd>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<WorkerMsg>();

        let device_name = self.device_name.clone();
        let sample_rate = self.sample_rate;
        let timeslice = self.timeslice;

        let worker = std::thread::spawn(move || {
            run_worker(device_name, sample_rate, timeslice, chunk_tx, cmd_rx, ready_tx)
        });

        match ready_rx.recv_timeout(WORKER_STARTUP_TIMEOUT) {
            Ok(WorkerMsg::Ready) => {}
            Ok(WorkerMsg::Failed(e)) => {
                let _ = worker.join();
                return Err(anyhow!(e));
            }
            Err(_) => return Err(anyhow!("Microphone worker startup timed out")),
        }

        self.cmd_tx = Some(cmd_tx);
        self.worker = Some(worker);

        info!("Microphone capture started at {} Hz", sample_rate);
        Ok(chunk_rx)
    }

    fn pause(&mut self) -> Result<()> {
        self.send_and_wait(Cmd::Pause)
    }

    fn resume(&mut self) -> Result<()> {
        self.send_and_wait(Cmd::Resume)
    }

    fn stop(&mut self) -> Result<()> {
        let result = self.send_and_wait(Cmd::Stop);
        self.cmd_tx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Microphone worker panicked");
            }
        }
        debug!("Microphone capture stopped");
        result
    }

    fn release(&mut self) {
        if self.cmd_tx.is_some() || self.worker.is_some() {
            if let Err(e) = self.stop() {
                warn!("Failed to stop microphone cleanly: {}", e);
            }
        }
    }

    fn is_acquired(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for MicrophoneDevice {
    fn drop(&mut self) {
        if self.is_acquired() {
            debug!("Dropping active MicrophoneDevice, cleaning up");
            self.release();
        }
    }
}

fn find_input_device(device_name: Option<&str>) -> std::result::Result<cpal::Device, DeviceAccessError> {
    let host = cpal::default_host();

    if let Some(needle) = device_name.map(str::trim).filter(|n| !n.is_empty()) {
        let devices = host
            .input_devices()
            .map_err(|e| classify_device_error(&e.to_string()))?;
        for device in devices {
            if device.name().map(|n| n == needle).unwrap_or(false) {
                return Ok(device);
            }
        }
        warn!(
            "Preferred input device not found, falling back to default: {}",
            needle
        );
    }

    host.default_input_device().ok_or(DeviceAccessError::NoDevice)
}

/// Map a backend error message onto the access taxonomy.
pub(crate) fn classify_device_error(message: &str) -> DeviceAccessError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        DeviceAccessError::PermissionDenied
    } else if lower.contains("not available")
        || lower.contains("no such device")
        || lower.contains("no device")
        || lower.contains("not found")
    {
        DeviceAccessError::NoDevice
    } else {
        DeviceAccessError::Other(message.to_string())
    }
}

fn run_worker(
    device_name: Option<String>,
    sample_rate: u32,
    timeslice: Duration,
    chunk_tx: mpsc::UnboundedSender<Vec<u8>>,
    cmd_rx: std_mpsc::Receiver<Cmd>,
    ready_tx: std_mpsc::Sender<WorkerMsg>,
) {
    let device = match find_input_device(device_name.as_deref()) {
        Ok(device) => device,
        Err(e) => {
            let _ = ready_tx.send(WorkerMsg::Failed(e));
            return;
        }
    };

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let (sample_tx, sample_rx) = std_mpsc::channel::<Vec<f32>>();
    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let _ = sample_tx.send(data.to_vec());
        },
        |err| error!("Microphone stream error: {}", err),
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(WorkerMsg::Failed(classify_device_error(&e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(WorkerMsg::Failed(classify_device_error(&e.to_string())));
        return;
    }

    let _ = ready_tx.send(WorkerMsg::Ready);

    let mut pending: Vec<f32> = Vec::new();
    let mut paused = false;
    let mut slice_started = Instant::now();

    loop {
        loop {
            let cmd = match cmd_rx.try_recv() {
                Ok(cmd) => cmd,
                Err(std_mpsc::TryRecvError::Empty) => break,
                Err(std_mpsc::TryRecvError::Disconnected) => {
                    debug!("Microphone controller went away, stopping capture");
                    flush(&mut pending, &chunk_tx);
                    return;
                }
            };
            match cmd {
                Cmd::Pause(ack) => {
                    drain_samples(&sample_rx, &mut pending, paused);
                    flush(&mut pending, &chunk_tx);
                    if let Err(e) = stream.pause() {
                        warn!("Failed to suspend microphone stream: {}", e);
                    }
                    paused = true;
                    let _ = ack.send(());
                }
                Cmd::Resume(ack) => {
                    // Anything captured while suspended is not part of the recording.
                    while sample_rx.try_recv().is_ok() {}
                    if let Err(e) = stream.play() {
                        warn!("Failed to resume microphone stream: {}", e);
                    }
                    paused = false;
                    slice_started = Instant::now();
                    let _ = ack.send(());
                }
                Cmd::Stop(ack) => {
                    drain_samples(&sample_rx, &mut pending, paused);
                    flush(&mut pending, &chunk_tx);
                    drop(stream);
                    let _ = ack.send(());
                    return;
                }
            }
        }

        match sample_rx.recv_timeout(Duration::from_millis(20)) {
            Ok(samples) if !paused => pending.extend_from_slice(&samples),
            Ok(_) => {}
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                flush(&mut pending, &chunk_tx);
                return;
            }
        }

        if !paused && slice_started.elapsed() >= timeslice {
            flush(&mut pending, &chunk_tx);
            slice_started = Instant::now();
        }
    }
}

fn drain_samples(sample_rx: &std_mpsc::Receiver<Vec<f32>>, pending: &mut Vec<f32>, paused: bool) {
    while let Ok(samples) = sample_rx.try_recv() {
        if !paused {
            pending.extend_from_slice(&samples);
        }
    }
}

fn flush(pending: &mut Vec<f32>, chunk_tx: &mpsc::UnboundedSender<Vec<u8>>) {
    if pending.is_empty() {
        return;
    }
    let chunk = samples_to_pcm16(pending);
    pending.clear();
    if chunk_tx.send(chunk).is_err() {
        debug!("Chunk receiver dropped, discarding microphone chunk");
    }
}

/// Convert float samples in [-1, 1] to 16-bit little-endian PCM.
pub(crate) fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| {
            let clamped = s.clamp(-1.0, 1.0);
            ((clamped * i16::MAX as f32) as i16).to_le_bytes()
        })
        .collect()
}
