//! Archiving raw PCM recordings as WAV files.

use anyhow::{bail, Context, Result};
use hound::{WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use tracing::info;

/// Read a parameter such as `rate` out of `audio/l16;rate=16000;channels=1`.
pub fn mime_param<'a>(mime_type: &'a str, name: &str) -> Option<&'a str> {
    mime_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

pub fn is_pcm(mime_type: &str) -> bool {
    mime_type
        .split(';')
        .next()
        .map(|base| base.trim().eq_ignore_ascii_case("audio/l16"))
        .unwrap_or(false)
}

/// Write 16-bit little-endian PCM bytes to a WAV file.
pub fn write_pcm_wav(path: &Path, pcm: &[u8], mime_type: &str, default_rate: u32) -> Result<()> {
    if !is_pcm(mime_type) {
        bail!(
            "Only raw PCM recordings can be kept as WAV (recording is {})",
            mime_type
        );
    }

    let sample_rate = mime_param(mime_type, "rate")
        .and_then(|rate| rate.parse().ok())
        .unwrap_or(default_rate);
    let channels = mime_param(mime_type, "channels")
        .and_then(|channels| channels.parse().ok())
        .unwrap_or(1);

    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create recording directory")?;
    }

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for frame in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([frame[0], frame[1]]))?;
    }
    writer.finalize()?;

    info!(
        "Recording saved: {:?} ({} samples at {}Hz)",
        path,
        pcm.len() / 2,
        sample_rate
    );
    Ok(())
}

/// Timestamped archive path inside `dir`.
pub fn archive_path(dir: &Path) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let path = dir.join(format!("entry-{}.wav", timestamp));
    if !path.exists() {
        return path;
    }

    (1..100)
        .map(|i| dir.join(format!("entry-{}-{}.wav", timestamp, i)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_params() {
        let mime = "audio/l16; rate=44100; channels=1";
        assert_eq!(mime_param(mime, "rate"), Some("44100"));
        assert_eq!(mime_param(mime, "channels"), Some("1"));
        assert_eq!(mime_param(mime, "codecs"), None);
        assert!(is_pcm(mime));
        assert!(!is_pcm("audio/webm;codecs=opus"));
    }

    #[test]
    fn test_write_pcm_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("entry.wav");
        let samples: [i16; 4] = [0, 1000, -1000, i16::MAX];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        write_pcm_wav(&path, &pcm, "audio/l16;rate=8000;channels=1", 16000).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.spec().channels, 1);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);
    }

    #[test]
    fn test_rejects_encoded_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.wav");
        assert!(write_pcm_wav(&path, b"webm", "audio/webm", 16000).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_archive_path_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let first = archive_path(dir.path());
        std::fs::write(&first, b"").unwrap();
        let second = archive_path(dir.path());
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with(".wav"));
    }
}
