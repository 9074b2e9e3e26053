/// All errors that can occur in chunkscribe.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("file type not allowed: .{extension}")]
    UnsupportedFileType { extension: String },

    #[error("missing credential: {0} is not set")]
    MissingCredential(&'static str),

    #[error("ffmpeg not found — install with: apt install ffmpeg")]
    FfmpegNotFound,

    #[error("media file not found: {path}")]
    MediaNotFound { path: std::path::PathBuf },

    #[error("media probe failed: {0}")]
    Probe(String),

    #[error("segment export failed: {0}")]
    SegmentExport(String),

    #[error("transcription error: {0}")]
    Transcription(String),

    #[error("post-processing error: {0}")]
    Refinement(String),

    #[error("diarization error: {0}")]
    Diarization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
