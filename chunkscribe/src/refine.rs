use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Remote text-refinement capability: spelling, punctuation, and formatting
/// fixes over a finished transcript.
#[async_trait]
pub trait RefinementGateway: Send + Sync {
    async fn refine(
        &self,
        transcript: &str,
        dictionary: Option<&str>,
        instruction: Option<&str>,
    ) -> Result<String>;
}

/// Instruction used when the caller supplies none.
pub const DEFAULT_REFINEMENT_INSTRUCTION: &str =
    "You are a helpful assistant tasked with refining an audio transcription.";

const FORMATTING_RULES: &str = "Correct any spelling discrepancies, add necessary punctuation \
(periods, commas, capitalization), and ensure proper formatting. Only use the context provided \
in the transcript itself. Output only the corrected text.";

/// Assemble the system prompt: caller instruction (or the default), the
/// glossary if present, then the fixed formatting rules.
pub fn build_system_prompt(instruction: Option<&str>, dictionary: Option<&str>) -> String {
    let mut prompt = instruction
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_REFINEMENT_INSTRUCTION)
        .to_string();

    if let Some(terms) = dictionary.filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!(
            "\n\nEnsure the following terms are spelled correctly if they appear: {terms}"
        ));
    }

    prompt.push_str(&format!("\n\n{FORMATTING_RULES}"));
    prompt
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Refiner backed by an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiRefiner {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiRefiner {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

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

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl RefinementGateway for OpenAiRefiner {
    async fn refine(
        &self,
        transcript: &str,
        dictionary: Option<&str>,
        instruction: Option<&str>,
    ) -> Result<String> {
        let system_prompt = build_system_prompt(instruction, dictionary);
        debug!(model = %self.model, transcript_len = transcript.len(), "refining transcript");

        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": transcript },
            ],
            "temperature": 0.2,
        });

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Refinement(format!("status {status}: {body}")));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Refinement("response contained no choices".into()))?;
        Ok(choice.message.content.trim().to_string())
    }
}
