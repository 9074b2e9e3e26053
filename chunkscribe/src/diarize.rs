use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::mime_for_extension;

/// Handle for an asynchronous diarization job running remotely.
///
/// The job completes later via the webhook; only the initial id and status
/// are captured here.
#[derive(Debug, Clone)]
pub struct DiarizationJob {
    pub job_id: Option<String>,
    pub status: String,
}

/// Remote speaker-diarization capability.
///
/// `start_job` uploads the file to the service's temporary storage and
/// starts a job that reports its result to `webhook_url`.
#[async_trait]
pub trait DiarizationGateway: Send + Sync {
    async fn start_job(
        &self,
        media_path: &Path,
        extension: &str,
        webhook_url: &str,
    ) -> Result<DiarizationJob>;
}

const DEFAULT_BASE_URL: &str = "https://api.pyannote.ai/v1";

/// The media upload can carry the whole original file.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(900);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Diarizer backed by the pyannote.ai API: request a presigned upload URL,
/// PUT the file bytes, then submit the job.
#[derive(Debug, Clone)]
pub struct PyannoteDiarizer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl PyannoteDiarizer {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
        })
    }
}

#[derive(Deserialize)]
struct PresignedUpload {
    url: Option<String>,
}

#[derive(Deserialize)]
struct DiarizeJobResponse {
    #[serde(rename = "jobId")]
    job_id: Option<String>,
    status: Option<String>,
}

#[async_trait]
impl DiarizationGateway for PyannoteDiarizer {
    async fn start_job(
        &self,
        media_path: &Path,
        extension: &str,
        webhook_url: &str,
    ) -> Result<DiarizationJob> {
        let base = self.base_url.trim_end_matches('/');
        let object_url = temporary_object_url(extension);
        debug!(object_url = %object_url, "requesting presigned upload URL");

        let response = self
            .client
            .post(format!("{base}/media/input"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "url": object_url }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Diarization(format!(
                "presigned URL request failed, status {status}: {body}"
            )));
        }
        let presigned: PresignedUpload = response.json().await?;
        let put_url = presigned
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Diarization("no presigned upload URL in response".into()))?;

        let bytes = tokio::fs::read(media_path).await?;
        debug!(size_bytes = bytes.len(), "uploading media to temporary storage");
        let upload = self
            .client
            .put(&put_url)
            .header(reqwest::header::CONTENT_TYPE, mime_for_extension(extension))
            .body(bytes)
            .send()
            .await?;
        if !upload.status().is_success() {
            return Err(Error::Diarization(format!(
                "media upload failed, status {}",
                upload.status()
            )));
        }

        let response = self
            .client
            .post(format!("{base}/diarize"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "url": object_url, "webhook": webhook_url }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Diarization(format!(
                "job submission failed, status {status}: {body}"
            )));
        }
        let job: DiarizeJobResponse = response.json().await?;

        let job = DiarizationJob {
            job_id: job.job_id,
            status: job.status.unwrap_or_else(|| "unknown".to_string()),
        };
        info!(job_id = ?job.job_id, status = %job.status, "diarization job started");
        Ok(job)
    }
}

/// Unique temporary-storage path for one upload.
fn temporary_object_url(extension: &str) -> String {
    format!("media://{}/conversation.{extension}", Uuid::new_v4())
}
