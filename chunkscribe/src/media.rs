use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::planner::SegmentSpan;

/// Capability for inspecting and slicing local media files.
///
/// The production implementation shells out to ffprobe/ffmpeg; tests swap in
/// fakes so no media tooling is needed.
#[async_trait]
pub trait MediaSplitter: Send + Sync {
    /// Total duration of the file in milliseconds.
    async fn probe_duration_ms(&self, path: &Path) -> Result<u64>;

    /// Render one span of `src` to `dest` as mp3.
    ///
    /// Segments are always exported as mp3 regardless of the source
    /// container, for broad compatibility with the transcription service.
    async fn export_segment(&self, src: &Path, span: &SegmentSpan, dest: &Path) -> Result<()>;
}

/// Splitter backed by the ffmpeg/ffprobe binaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegSplitter;

impl FfmpegSplitter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaSplitter for FfmpegSplitter {
    async fn probe_duration_ms(&self, path: &Path) -> Result<u64> {
        if !path.exists() {
            return Err(Error::MediaNotFound {
                path: path.to_path_buf(),
            });
        }

        let output = tokio::process::Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::FfmpegNotFound
                } else {
                    Error::Probe(format!("failed to run ffprobe: {e}"))
                }
            })?;

        if !output.status.success() {
            return Err(Error::Probe(format!(
                "ffprobe failed: {}",
                truncate_output(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let duration_ms = parse_duration_ms(&stdout).ok_or_else(|| {
            Error::Probe(format!("ffprobe returned no duration: {:?}", stdout.trim()))
        })?;

        debug!(path = %path.display(), duration_ms, "probed media duration");
        Ok(duration_ms)
    }

    async fn export_segment(&self, src: &Path, span: &SegmentSpan, dest: &Path) -> Result<()> {
        if !src.exists() {
            return Err(Error::MediaNotFound {
                path: src.to_path_buf(),
            });
        }

        info!(
            src = %src.display(),
            segment = span.index,
            start_ms = span.start_ms,
            end_ms = span.end_ms,
            "exporting segment"
        );

        // -ss after -i seeks by decoding, keeping segment boundaries exact.
        let output = tokio::process::Command::new("ffmpeg")
            .args(["-nostdin", "-y", "-i"])
            .arg(src)
            .args([
                "-ss",
                &format_offset_secs(span.start_ms),
                "-t",
                &format_offset_secs(span.duration_ms()),
                "-vn",
                "-acodec",
                "libmp3lame",
            ])
            .arg(dest)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::FfmpegNotFound
                } else {
                    Error::SegmentExport(format!("failed to run ffmpeg: {e}"))
                }
            })?;

        if !output.status.success() {
            return Err(Error::SegmentExport(format!(
                "ffmpeg failed: {}",
                truncate_output(&output.stderr)
            )));
        }

        if !dest.exists() {
            return Err(Error::SegmentExport(format!(
                "ffmpeg produced no output at {}",
                dest.display()
            )));
        }

        Ok(())
    }
}

/// Parse ffprobe's duration output (seconds as a decimal string) into
/// milliseconds.
fn parse_duration_ms(raw: &str) -> Option<u64> {
    let secs: f64 = raw.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some((secs * 1000.0).round() as u64)
}

/// Format a millisecond offset as seconds for ffmpeg arguments.
fn format_offset_secs(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

/// Limit captured process output to a readable length for error messages.
fn truncate_output(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).chars().take(1000).collect()
}
