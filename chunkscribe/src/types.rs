use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// File extensions accepted for upload, matching what the transcription
/// service can decode.
pub const ALLOWED_EXTENSIONS: [&str; 7] = ["mp3", "mp4", "mpeg", "mpga", "m4a", "wav", "webm"];

/// Whether an extension (without the dot) is on the allow-list.
/// Case-insensitive.
pub fn is_allowed_extension(extension: &str) -> bool {
    let lower = extension.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&lower.as_str())
}

/// Extension of a filename, lowercased, without the dot.
pub fn file_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Content type for an allow-listed media extension.
pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "mp3" | "mpga" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "webm" => "audio/webm",
        "mp4" => "video/mp4",
        "mpeg" => "video/mpeg",
        _ => "application/octet-stream",
    }
}

/// Reduce an untrusted filename to a safe single path component.
///
/// Drops any directory components, maps characters outside
/// `[A-Za-z0-9._-]` to `_`, and strips leading dots.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// A transient uploaded file owned by exactly one pipeline run.
///
/// The id prefixes the stored filename and every derived segment filename,
/// keeping concurrent requests collision-free in a shared upload directory.
/// The owning run deletes the file on every exit path.
#[derive(Debug, Clone)]
pub struct UploadedMedia {
    pub id: Uuid,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Lowercased extension taken from the original filename.
    pub extension: String,
    pub original_filename: String,
}

impl UploadedMedia {
    /// Describe a persisted upload, validating its extension against the
    /// allow-list.
    pub fn new(
        id: Uuid,
        path: impl Into<PathBuf>,
        original_filename: impl Into<String>,
        size_bytes: u64,
    ) -> Result<Self> {
        let original_filename = original_filename.into();
        let extension = match file_extension(&original_filename) {
            Some(ext) if is_allowed_extension(&ext) => ext,
            Some(ext) => return Err(Error::UnsupportedFileType { extension: ext }),
            None => {
                return Err(Error::UnsupportedFileType {
                    extension: String::new(),
                })
            }
        };
        Ok(Self {
            id,
            path: path.into(),
            size_bytes,
            extension,
            original_filename,
        })
    }
}

/// Terminal result of one pipeline run, serialized directly as the JSON
/// response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// Concatenated transcript in segment order.
    pub transcription: String,
    /// Refined transcript, or an explanatory error string when refinement
    /// failed. `None` when refinement was not requested or was skipped.
    pub post_processed_transcription: Option<String>,
    /// Wall-clock processing time in seconds, formatted with two decimals.
    pub processing_time: String,
    /// Number of segments transcribed (1 on the single-call path).
    pub chunks_created: usize,
    pub pyannote_job_id: Option<String>,
    /// Initial job status, a skip token, or `error: <message>`.
    pub pyannote_status: Option<String>,
    pub pyannote_webhook_used: Option<String>,
}
