//! Mime type negotiation between preferred encodings and what a device offers.

/// Encodings in preference order. Browser-style containers first, raw PCM last.
pub const DEFAULT_MIME_PREFERENCES: &[&str] = &[
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/ogg;codecs=opus",
    "audio/mp4",
    "audio/wav",
    "audio/l16",
];

/// Used when no preference is supported, so negotiation itself never fails.
pub const FALLBACK_MIME_TYPE: &str = "audio/webm";

/// Pick the first preference the device supports, or `FALLBACK_MIME_TYPE`.
pub fn negotiate<P, S>(preferences: &[P], supported: &[S]) -> String
where
    P: AsRef<str>,
    S: AsRef<str>,
{
    negotiate_with_fallback(preferences, supported, FALLBACK_MIME_TYPE)
}

/// Pick the first preference the device supports, or `fallback`.
///
/// A preference without parameters (`audio/l16`) also matches a supported
/// type with parameters (`audio/l16;rate=16000`). The device's own spelling
/// is returned so that parameters survive.
pub fn negotiate_with_fallback<P, S>(preferences: &[P], supported: &[S], fallback: &str) -> String
where
    P: AsRef<str>,
    S: AsRef<str>,
{
    for preference in preferences {
        let wanted = normalize(preference.as_ref());
        if wanted.is_empty() {
            continue;
        }
        let wanted_has_params = wanted.contains(';');

        for offered in supported {
            let candidate = normalize(offered.as_ref());
            let matches = candidate == wanted
                || (!wanted_has_params && base_type(&candidate) == wanted);
            if matches {
                return offered.as_ref().trim().to_string();
            }
        }
    }

    fallback.to_string()
}

/// File extension used when naming uploads.
pub fn extension_for(mime_type: &str) -> &'static str {
    match base_type(&normalize(mime_type)) {
        "audio/webm" | "video/webm" => "webm",
        "audio/ogg" | "audio/opus" => "ogg",
        "audio/mp4" => "mp4",
        "audio/m4a" | "audio/x-m4a" => "m4a",
        "audio/wav" | "audio/wave" | "audio/x-wav" => "wav",
        "audio/mpeg" => "mp3",
        "audio/l16" => "pcm",
        _ => "bin",
    }
}

/// Mime type for a local file, by extension.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "webm" => Some("audio/webm"),
        "ogg" | "oga" | "opus" => Some("audio/ogg"),
        "mp4" | "m4a" => Some("audio/mp4"),
        "wav" => Some("audio/wav"),
        "mp3" => Some("audio/mpeg"),
        "pcm" | "raw" => Some("audio/l16"),
        _ => None,
    }
}

fn normalize(mime_type: &str) -> String {
    mime_type
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(";")
        .to_ascii_lowercase()
}

fn base_type(normalized: &str) -> &str {
    normalized.split(';').next().unwrap_or_default()
}
