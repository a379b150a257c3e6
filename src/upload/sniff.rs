//! Content-based audio type detection.

/// How many leading bytes are inspected to detect the content type.
pub const SNIFF_LEN: usize = 512;

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

const SUPPORTED_MIME_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/x-wav",
    "audio/wave",
    "audio/flac",
    "audio/x-flac",
    "audio/mp4",
    "audio/x-m4a",
    "audio/m4a",
    "audio/aac",
    "audio/x-aac",
    "audio/ogg",
    "application/ogg",
    "audio/opus",
    "audio/vorbis",
];

/// Human-facing list reported to clients with `unsupported_mime`.
pub const ALLOWED_FORMATS: &[&str] = &["mp3", "wav", "flac", "m4a", "mp4", "aac", "ogg", "opus"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniffedType {
    pub mime_type: String,
    /// Including the leading dot, or empty when the type has no known one.
    pub extension: String,
}

/// Detects the content type of `head`, the first bytes of an upload.
pub fn sniff(head: &[u8]) -> SniffedType {
    let head = &head[..head.len().min(SNIFF_LEN)];
    match infer::get(head) {
        Some(kind) => SniffedType {
            mime_type: normalize_mime_type(kind.mime_type()),
            extension: format!(".{}", kind.extension()),
        },
        None => SniffedType {
            mime_type: FALLBACK_MIME_TYPE.to_string(),
            extension: String::new(),
        },
    }
}

/// Lowercases, trims and drops any `;`-parameters.
pub fn normalize_mime_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

pub fn is_supported_mime_type(mime_type: &str) -> bool {
    let normalized = normalize_mime_type(mime_type);
    SUPPORTED_MIME_TYPES.contains(&normalized.as_str())
}
