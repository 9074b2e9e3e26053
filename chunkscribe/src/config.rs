use std::path::PathBuf;

use crate::error::{Error, Result};

/// Size threshold in megabytes above which an upload is split into segments.
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 24;

/// Per-segment duration cap (15 minutes).
pub const DEFAULT_MAX_SEGMENT_MS: u64 = 15 * 60 * 1000;

/// Speech-to-text model requested from the transcription service.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "gpt-4o-transcribe";

/// Chat model used for transcript refinement.
pub const DEFAULT_REFINEMENT_MODEL: &str = "gpt-4.1";

/// Process-wide configuration, constructed once at startup and passed
/// explicitly into the pipeline and gateways.
///
/// The transcription credential is required; the diarization credential and
/// the webhook base are optional and their absence degrades diarization to a
/// skipped, non-fatal state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Credential for the speech-to-text and refinement service.
    pub openai_api_key: String,
    /// Credential for the diarization service. `None` disables diarization.
    pub pyannote_api_key: Option<String>,
    /// Public base address used to construct the diarization callback URL.
    pub webhook_base_url: Option<String>,
    /// Directory holding uploads and transient segment files.
    pub upload_dir: PathBuf,
    /// Uploads larger than this are split before transcription.
    pub max_file_size_mb: u64,
    /// Maximum duration of a single segment in milliseconds.
    pub max_segment_ms: u64,
    pub transcription_model: String,
    pub refinement_model: String,
}

impl Config {
    pub fn new(openai_api_key: impl Into<String>) -> Self {
        Self {
            openai_api_key: openai_api_key.into(),
            pyannote_api_key: None,
            webhook_base_url: None,
            upload_dir: PathBuf::from("uploads"),
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            max_segment_ms: DEFAULT_MAX_SEGMENT_MS,
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            refinement_model: DEFAULT_REFINEMENT_MODEL.to_string(),
        }
    }

    /// Build a configuration from environment variables.
    ///
    /// Reads `OPENAI_API_KEY` (required), `PYANNOTE_API_KEY`,
    /// `PUBLIC_WEBHOOK_URL_BASE`, and `UPLOAD_DIR`. Empty values are treated
    /// as unset.
    pub fn from_env() -> Result<Self> {
        let openai_api_key =
            env_nonempty("OPENAI_API_KEY").ok_or(Error::MissingCredential("OPENAI_API_KEY"))?;

        let mut config = Config::new(openai_api_key);
        config.pyannote_api_key = env_nonempty("PYANNOTE_API_KEY");
        config.webhook_base_url = env_nonempty("PUBLIC_WEBHOOK_URL_BASE");
        if let Some(dir) = env_nonempty("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    pub fn pyannote_api_key(mut self, key: impl Into<String>) -> Self {
        self.pyannote_api_key = Some(key.into());
        self
    }

    pub fn webhook_base_url(mut self, base: impl Into<String>) -> Self {
        self.webhook_base_url = Some(base.into());
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }

    pub fn max_file_size_mb(mut self, mb: u64) -> Self {
        self.max_file_size_mb = mb;
        self
    }

    pub fn max_segment_ms(mut self, ms: u64) -> Self {
        self.max_segment_ms = ms;
        self
    }

    pub fn transcription_model(mut self, model: impl Into<String>) -> Self {
        self.transcription_model = model.into();
        self
    }

    pub fn refinement_model(mut self, model: impl Into<String>) -> Self {
        self.refinement_model = model.into();
        self
    }

    /// Size threshold in bytes derived from `max_file_size_mb`.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Per-request options, typically parsed from the inbound form fields.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    /// Guidance prompt passed to every transcription call.
    pub prompt: Option<String>,
    /// Free-text glossary of terms to keep spelled correctly.
    pub dictionary: Option<String>,
    /// Run the transcript through the refinement service afterwards.
    pub post_process: bool,
    /// Instruction prompt for refinement. Falls back to a built-in default.
    pub post_process_prompt: Option<String>,
    /// Submit the original file for speaker diarization.
    pub request_diarization: bool,
}

impl TranscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn dictionary(mut self, terms: impl Into<String>) -> Self {
        self.dictionary = Some(terms.into());
        self
    }

    pub fn post_process(mut self, enabled: bool) -> Self {
        self.post_process = enabled;
        self
    }

    pub fn post_process_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.post_process_prompt = Some(prompt.into());
        self
    }

    pub fn request_diarization(mut self, enabled: bool) -> Self {
        self.request_diarization = enabled;
        self
    }
}
