use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::mime_for_extension;

/// Remote speech-to-text capability.
///
/// One call transcribes one local audio file. The prompt, when present, is
/// passed verbatim as transcription guidance.
#[async_trait]
pub trait TranscriptionGateway: Send + Sync {
    async fn transcribe(&self, audio_path: &Path, prompt: Option<&str>) -> Result<String>;
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Generous ceiling per call; a 15 minute mp3 segment can take a while to
/// upload and transcribe.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(900);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transcriber backed by an OpenAI-compatible `/audio/transcriptions`
/// endpoint, requesting plain-text output.
#[derive(Debug, Clone)]
pub struct OpenAiTranscriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiTranscriber {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    /// Point the gateway at a different endpoint (self-hosted relay, test
    /// server).
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl TranscriptionGateway for OpenAiTranscriber {
    async fn transcribe(&self, audio_path: &Path, prompt: Option<&str>) -> Result<String> {
        let bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let mime = mime_for_path(audio_path);

        debug!(
            file = %file_name,
            size_bytes = bytes.len(),
            model = %self.model,
            "sending transcription request"
        );

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime)?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "text");
        if let Some(prompt) = prompt {
            form = form.text("prompt", prompt.to_string());
        }

        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Transcription(format!(
                "status {status}: {}",
                snippet(&body)
            )));
        }

        // With response_format=text the body is the transcript itself.
        Ok(body)
    }
}

/// Content type for a media file, from its extension.
fn mime_for_path(path: &Path) -> &'static str {
    path.extension()
        .and_then(|e| e.to_str())
        .map(mime_for_extension)
        .unwrap_or("application/octet-stream")
}

/// First part of an error body, enough to diagnose without dumping huge
/// payloads into logs.
fn snippet(body: &str) -> String {
    body.chars().take(1000).collect()
}
