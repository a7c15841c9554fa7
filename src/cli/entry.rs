//! CLI handlers for recording, typing and replaying journal entries.
//!
//! Every path goes through the same `RecordingController`, so the guards,
//! upload retry and insight/save handling are identical to the library's.

use anyhow::{anyhow, bail, Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::app::{build_controller, controller_options, microphone_from_config};
use crate::capture::{archive_path, write_pcm_wav, CaptureDevice, FileCaptureDevice};
use crate::cli::{RecordCliArgs, ReplayCliArgs, WriteCliArgs};
use crate::config::Config;
use crate::global;
use crate::profile::UserContext;
use crate::remote::{Insight, Polarity};
use crate::session::{
    EncodedBlob, ErrorKind, RecordingController, SessionError, SessionOutcome, SessionPhase,
};

/// Handle `yournal record`.
pub async fn handle_record_command(args: RecordCliArgs) -> Result<()> {
    let config = Config::load()?;
    let context = UserContext::from_config(&config.user)?;
    let device = microphone_from_config(&config);
    let mut controller = build_controller(&config, Box::new(device), context)?;

    let mime_type = controller.start().await?;
    println!("Recording ({}). Speak now.", mime_type);

    loop {
        let chunks = controller.poll_chunks().await;
        let paused = controller.phase() == SessionPhase::Paused;
        let (prompt, items) = if paused {
            ("Paused", vec!["Resume", "Stop", "Discard"])
        } else {
            ("Recording", vec!["Pause", "Stop", "Discard"])
        };

        let choice = select(format!("{} ({} chunk(s) so far)", prompt, chunks), items).await?;
        match (choice, paused) {
            (0, true) => controller.resume().await?,
            (0, false) => controller.pause().await?,
            (1, _) => break,
            _ => {
                controller.discard().await;
                println!("Recording discarded.");
                return Ok(());
            }
        }
    }

    let blob = controller.stop().await?;
    if blob.is_empty() {
        controller.discard().await;
        bail!("Nothing was recorded");
    }
    println!("Captured {}.", format_size(blob.len()));

    let keep = match (args.keep, args.archive) {
        (Some(path), _) => Some(path),
        (None, true) => Some(archive_path(&global::recordings_dir()?)),
        (None, false) => None,
    };
    if let Some(path) = keep {
        keep_recording(&path, &blob, config.recording.sample_rate);
    }

    if !args.yes && !confirm("Send this entry?", true).await? {
        controller.discard().await;
        println!("Entry discarded.");
        return Ok(());
    }

    submit_recording(&mut controller).await
}

/// Handle `yournal write`.
pub async fn handle_write_command(args: WriteCliArgs) -> Result<()> {
    let config = Config::load()?;
    let context = UserContext::from_config(&config.user)?;

    let text = if args.text.is_empty() {
        prompt_text().await?
    } else {
        args.text.join(" ")
    };

    let device = microphone_from_config(&config);
    let mut controller = build_controller(&config, Box::new(device), context)?;

    let spinner = create_spinner("Waiting for insight...");
    let result = controller.submit_text(&text).await;
    spinner.finish_and_clear();

    match result {
        Ok(outcome) => finish(outcome).await,
        Err(err) => report_failure(&mut controller, err).await,
    }
}

/// Handle `yournal replay`.
pub async fn handle_replay_command(args: ReplayCliArgs) -> Result<()> {
    let config = Config::load()?;
    let context = UserContext::from_config(&config.user)?;

    let mut device = FileCaptureDevice::new(&args.file);
    if args.realtime {
        device = device.with_timeslice(Duration::from_millis(config.recording.timeslice_ms));
    }
    let mut finished = device.finished();

    // The file's own type comes first so it is never relabelled.
    let mut options = controller_options(&config);
    let own_types = device.supported_mime_types();
    if own_types.is_empty() {
        warn!(
            "Unrecognised extension for {:?}; it will be sent as {}",
            args.file, options.fallback_mime_type
        );
    }
    let mut preferences = own_types;
    preferences.extend(options.mime_preferences);
    options.mime_preferences = preferences;

    let mut controller =
        build_controller(&config, Box::new(device), context)?.with_options(options);

    let mime_type = controller.start().await?;
    info!("Replaying {:?} as {}", args.file, mime_type);

    finished
        .wait_for(|done| *done)
        .await
        .map_err(|_| anyhow!("Replay of {} ended unexpectedly", args.file.display()))?;

    let blob = controller.stop().await?;
    if blob.is_empty() {
        controller.discard().await;
        bail!("{} is empty", args.file.display());
    }
    println!("Read {} from {}.", format_size(blob.len()), args.file.display());

    submit_recording(&mut controller).await
}

/// Upload and request the insight, offering to resend after upload failures.
async fn submit_recording(controller: &mut RecordingController) -> Result<()> {
    loop {
        let spinner = create_spinner("Uploading and waiting for insight...");
        let result = controller.submit().await;
        spinner.finish_and_clear();

        match result {
            Ok(outcome) => return finish(outcome).await,
            Err(err) if err.kind() == ErrorKind::Upload => {
                eprintln!("{}", err);
                if !confirm("Try sending it again?", true).await? {
                    controller.discard().await;
                    bail!("Entry was not sent");
                }
            }
            Err(err) => return report_failure(controller, err).await,
        }
    }
}

async fn finish(outcome: SessionOutcome) -> Result<()> {
    print_insight(&outcome.insight);

    let spinner = create_spinner("Saving entry...");
    let report = outcome.persistence.wait().await;
    spinner.finish_and_clear();

    match report.result {
        Ok(()) => println!("Entry saved."),
        Err(message) => eprintln!("Warning: your insight is ready but the entry was not saved: {}", message),
    }
    Ok(())
}

async fn report_failure(controller: &mut RecordingController, err: SessionError) -> Result<()> {
    if err.kind() == ErrorKind::Insight {
        if let Some(pending) = controller.take_orphaned_persistence() {
            let report = pending.wait().await;
            if report.is_saved() {
                eprintln!("Your entry was saved, but no insight could be produced.");
            }
        }
    }

    Err(err.into())
}

fn print_insight(insight: &Insight) {
    println!();
    println!("{}  {}", insight.mood_emoji, insight.title);
    if !insight.description.is_empty() {
        println!();
        println!("{}", insight.description);
    }
    if !insight.insights.is_empty() {
        println!();
        for item in &insight.insights {
            let marker = match item.polarity {
                Polarity::Positive => "+",
                Polarity::Negative => "-",
                Polarity::Neutral => "·",
            };
            println!("  {} {}", marker, item.text);
        }
    }
    println!();
}

fn keep_recording(path: &Path, blob: &EncodedBlob, default_rate: u32) {
    match write_pcm_wav(path, blob.bytes(), blob.mime_type(), default_rate) {
        Ok(()) => println!("Recording kept at {}", path.display()),
        Err(e) => warn!("Could not keep recording: {:#}", e),
    }
}

async fn select(prompt: String, items: Vec<&'static str>) -> Result<usize> {
    tokio::task::spawn_blocking(move || {
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .items(&items)
            .default(0)
            .interact()
    })
    .await
    .context("Prompt task failed")?
    .context("Failed to read selection")
}

async fn confirm(prompt: &'static str, default: bool) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(default)
            .interact()
    })
    .await
    .context("Prompt task failed")?
    .context("Failed to read confirmation")
}

async fn prompt_text() -> Result<String> {
    tokio::task::spawn_blocking(|| {
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt("How was your day?")
            .interact_text()
    })
    .await
    .context("Prompt task failed")?
    .context("Failed to read entry text")
}

fn create_spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn format_size(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} bytes", bytes)
    }
}
