//! Chunked transcription library — oversized audio/video in, one ordered transcript out.
//!
//! **chunkscribe** handles the full pipeline: size screening, ffmpeg-based
//! splitting into duration-capped MP3 segments, sequential per-segment
//! transcription, optional transcript refinement, and optional speaker
//! diarization kickoff. Every transient file is removed on every exit path,
//! success or failure.
//!
//! # Quick start
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> chunkscribe::Result<()> {
//! let config = chunkscribe::Config::from_env()?;
//! let outcome = chunkscribe::transcribe_file("meeting.mp3", config).await?;
//! println!("{}", outcome.transcription);
//! # Ok(())
//! # }
//! ```
//!
//! The gateways behind transcription, refinement, and diarization are traits;
//! [`Pipeline::new`] accepts custom implementations for the hosted services
//! wired up by [`Pipeline::from_config`].

pub mod config;
pub mod diarize;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod planner;
pub mod refine;
pub mod stt;
pub mod types;

pub use config::{Config, TranscribeOptions};
pub use error::{Error, Result};
pub use pipeline::Pipeline;
pub use types::{PipelineOutcome, UploadedMedia};

use std::path::Path;

use uuid::Uuid;

/// Transcribe a local media file with default per-request options.
pub async fn transcribe_file(path: impl AsRef<Path>, config: Config) -> Result<PipelineOutcome> {
    transcribe_file_with_options(path, config, &TranscribeOptions::default()).await
}

/// Transcribe a local media file with custom options.
///
/// The file is copied into the configured upload directory first; the
/// original stays untouched while the pipeline owns and removes the copy.
pub async fn transcribe_file_with_options(
    path: impl AsRef<Path>,
    config: Config,
    options: &TranscribeOptions,
) -> Result<PipelineOutcome> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::MediaNotFound {
            path: path.to_path_buf(),
        });
    }
    let original = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let original = types::sanitize_filename(&original);

    tokio::fs::create_dir_all(&config.upload_dir).await?;
    let id = Uuid::new_v4();
    let staged = config.upload_dir.join(format!("{id}_{original}"));
    // Validates the extension before anything is copied.
    let mut upload = UploadedMedia::new(id, &staged, original, 0)?;
    upload.size_bytes = tokio::fs::copy(path, &staged).await?;

    Pipeline::from_config(config)?.run(upload, options).await
}
