//! HTTP front end for the chunkscribe pipeline.
//!
//! A single multipart endpoint accepts a media upload plus form options,
//! runs the pipeline, and answers with the outcome as JSON. Configuration
//! comes from the environment (a `.env` file is honored). When the
//! transcription credential is missing the server still starts and
//! `/transcribe` answers with a configuration error instead.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::io::AsyncWriteExt;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use chunkscribe::types::{file_extension, is_allowed_extension, sanitize_filename};
use chunkscribe::{Config, Pipeline, PipelineOutcome, TranscribeOptions, UploadedMedia};

/// Request body cap, comfortably above the split threshold so long
/// recordings can still be uploaded in one piece.
const MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

const DEFAULT_PORT: u16 = 5000;

struct AppState {
    /// `None` when the transcription credential is not configured.
    pipeline: Option<Pipeline>,
    upload_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chunkscribe=info".parse().unwrap())
                .add_directive("chunkscribe_server=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let upload_dir = upload_dir_from_env();
    if let Err(e) = std::fs::create_dir_all(&upload_dir) {
        error!(dir = %upload_dir.display(), error = %e, "cannot create upload directory");
        std::process::exit(1);
    }

    let pipeline = build_pipeline();
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(
        %addr,
        upload_dir = %upload_dir.display(),
        configured = pipeline.is_some(),
        "starting server"
    );

    let state = Arc::new(AppState {
        pipeline,
        upload_dir,
    });

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app(state)).await.unwrap();
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/transcribe", post(transcribe))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn upload_dir_from_env() -> PathBuf {
    std::env::var("UPLOAD_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("uploads"))
}

fn build_pipeline() -> Option<Pipeline> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "starting without a pipeline; /transcribe will answer with a configuration error");
            return None;
        }
    };
    match Pipeline::from_config(config) {
        Ok(pipeline) => Some(pipeline),
        Err(e) => {
            warn!(error = %e, "failed to build pipeline; /transcribe will answer with a configuration error");
            None
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /transcribe: multipart form with a `file` part and optional text
/// fields `prompt`, `dictionary`, `post_process`, `post_process_prompt`,
/// and `request_diarization`.
async fn transcribe(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<PipelineOutcome>, ApiError> {
    let Some(pipeline) = &state.pipeline else {
        return Err(ApiError::Internal(
            "Server configuration error: OpenAI API key not set.".to_string(),
        ));
    };

    let ReceivedRequest { upload, options } =
        read_request(multipart, &state.upload_dir).await?;

    info!(
        request_id = %upload.id,
        file = %upload.original_filename,
        size_bytes = upload.size_bytes,
        "accepted upload"
    );

    match pipeline.run(upload, &options).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            error!(error = %e, "request failed");
            Err(ApiError::Internal(format!(
                "An error occurred during processing: {e}"
            )))
        }
    }
}

struct ReceivedRequest {
    upload: UploadedMedia,
    options: TranscribeOptions,
}

/// Drain the multipart stream: persist the file part, collect the text
/// fields. The saved file is removed again if parsing fails later in the
/// stream.
async fn read_request(
    mut multipart: Multipart,
    upload_dir: &Path,
) -> Result<ReceivedRequest, ApiError> {
    let mut file: Option<PendingFile> = None;
    let mut options = TranscribeOptions::default();

    while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "file" => {
                let original = field.file_name().unwrap_or_default().to_string();
                if original.is_empty() {
                    return Err(ApiError::BadRequest("No selected file".into()));
                }
                let original = sanitize_filename(&original);
                match file_extension(&original) {
                    Some(ext) if is_allowed_extension(&ext) => {}
                    _ => return Err(ApiError::BadRequest("File type not allowed".into())),
                }
                let id = Uuid::new_v4();
                let path = upload_dir.join(format!("{id}_{original}"));
                let mut pending = PendingFile::new(id, path, original);
                pending.size_bytes = stream_to_file(&mut field, &pending.path).await?;
                file = Some(pending);
            }
            "prompt" => options.prompt = text_field(field).await?,
            "dictionary" => options.dictionary = text_field(field).await?,
            "post_process" => {
                options.post_process = checkbox(&field.text().await.map_err(bad_multipart)?)
            }
            "post_process_prompt" => options.post_process_prompt = text_field(field).await?,
            "request_diarization" => {
                options.request_diarization =
                    checkbox(&field.text().await.map_err(bad_multipart)?)
            }
            _ => {}
        }
    }

    let Some(mut file) = file else {
        return Err(ApiError::BadRequest("No file part".into()));
    };

    let upload = UploadedMedia::new(
        file.id,
        file.path.clone(),
        file.original.clone(),
        file.size_bytes,
    )
    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    // Ownership passes to the pipeline, which removes the file when done.
    file.keep = true;

    Ok(ReceivedRequest { upload, options })
}

async fn stream_to_file(field: &mut Field<'_>, path: &Path) -> Result<u64, ApiError> {
    let store_err = |e: std::io::Error| ApiError::Internal(format!("could not store upload: {e}"));
    let mut out = tokio::fs::File::create(path).await.map_err(store_err)?;
    let mut written: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
        out.write_all(&chunk).await.map_err(store_err)?;
        written += chunk.len() as u64;
    }
    out.flush().await.map_err(store_err)?;
    Ok(written)
}

async fn text_field(field: Field<'_>) -> Result<Option<String>, ApiError> {
    let value = field.text().await.map_err(bad_multipart)?;
    let trimmed = value.trim();
    Ok(if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    })
}

fn checkbox(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "on" | "true" | "1"
    )
}

fn bad_multipart(e: MultipartError) -> ApiError {
    ApiError::BadRequest(format!("malformed multipart request: {e}"))
}

/// Upload persisted mid-parse. Removed on drop unless ownership was handed
/// to the pipeline.
struct PendingFile {
    id: Uuid,
    path: PathBuf,
    original: String,
    size_bytes: u64,
    keep: bool,
}

impl PendingFile {
    fn new(id: Uuid, path: PathBuf, original: String) -> Self {
        Self {
            id,
            path,
            original,
            size_bytes: 0,
            keep: false,
        }
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.keep && self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove abandoned upload");
            }
        }
    }
}

enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
