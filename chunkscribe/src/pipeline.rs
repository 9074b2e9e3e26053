use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::{Config, TranscribeOptions};
use crate::diarize::{DiarizationGateway, PyannoteDiarizer};
use crate::error::Result;
use crate::media::{FfmpegSplitter, MediaSplitter};
use crate::planner;
use crate::refine::{OpenAiRefiner, RefinementGateway};
use crate::stt::{OpenAiTranscriber, TranscriptionGateway};
use crate::types::{PipelineOutcome, UploadedMedia};

/// Orchestrates one upload end to end: optional diarization kickoff, the
/// size-based chunking decision, sequential per-segment transcription,
/// optional refinement, and removal of every transient file on every path.
///
/// Segment processing is strictly sequential and ordered. A segment failure
/// aborts the whole run; diarization and refinement failures degrade into
/// the outcome instead.
pub struct Pipeline {
    config: Config,
    splitter: Arc<dyn MediaSplitter>,
    transcriber: Arc<dyn TranscriptionGateway>,
    refiner: Arc<dyn RefinementGateway>,
    diarizer: Option<Arc<dyn DiarizationGateway>>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        splitter: Arc<dyn MediaSplitter>,
        transcriber: Arc<dyn TranscriptionGateway>,
        refiner: Arc<dyn RefinementGateway>,
        diarizer: Option<Arc<dyn DiarizationGateway>>,
    ) -> Self {
        Self {
            config,
            splitter,
            transcriber,
            refiner,
            diarizer,
        }
    }

    /// Wire up the production gateways for a configuration. The diarizer is
    /// only present when its credential is configured.
    pub fn from_config(config: Config) -> Result<Self> {
        let transcriber = OpenAiTranscriber::new(
            config.openai_api_key.clone(),
            config.transcription_model.clone(),
        )?;
        let refiner = OpenAiRefiner::new(
            config.openai_api_key.clone(),
            config.refinement_model.clone(),
        )?;
        let diarizer: Option<Arc<dyn DiarizationGateway>> = match config.pyannote_api_key.clone() {
            Some(key) => Some(Arc::new(PyannoteDiarizer::new(key)?)),
            None => None,
        };
        Ok(Self::new(
            config,
            Arc::new(FfmpegSplitter::new()),
            Arc::new(transcriber),
            Arc::new(refiner),
            diarizer,
        ))
    }

    /// Process one uploaded file.
    ///
    /// Takes ownership of the upload: the file is deleted before this
    /// returns, on success and on every failure path alike.
    pub async fn run(
        &self,
        upload: UploadedMedia,
        opts: &TranscribeOptions,
    ) -> Result<PipelineOutcome> {
        let started = Instant::now();
        let _upload_guard = FileGuard(upload.path.clone());

        info!(
            request_id = %upload.id,
            file = %upload.original_filename,
            size_bytes = upload.size_bytes,
            "processing upload"
        );

        let diarization = if opts.request_diarization {
            self.start_diarization(&upload).await
        } else {
            DiarizationReport::default()
        };

        let effective_prompt =
            build_effective_prompt(opts.prompt.as_deref(), opts.dictionary.as_deref());

        let (transcription, chunks_created) =
            if upload.size_bytes > self.config.max_file_size_bytes() {
                self.transcribe_chunked(&upload, effective_prompt.as_deref())
                    .await?
            } else {
                info!(request_id = %upload.id, "within size limit, transcribing in one call");
                let text = self
                    .transcriber
                    .transcribe(&upload.path, effective_prompt.as_deref())
                    .await?;
                (text.trim().to_string(), 1)
            };

        let post_processed = self.maybe_refine(&upload, opts, &transcription).await;

        let elapsed = started.elapsed().as_secs_f64();
        info!(
            request_id = %upload.id,
            chunks = chunks_created,
            transcript_len = transcription.len(),
            elapsed_secs = format!("{elapsed:.2}"),
            "request complete"
        );

        Ok(PipelineOutcome {
            transcription,
            post_processed_transcription: post_processed,
            processing_time: format!("{elapsed:.2}"),
            chunks_created,
            pyannote_job_id: diarization.job_id,
            pyannote_status: diarization.status,
            pyannote_webhook_used: diarization.webhook_used,
        })
    }

    /// Split the upload and transcribe each segment in index order.
    ///
    /// Aborts on the first segment failure; remaining segments are never
    /// attempted. Each segment file lives for exactly one loop iteration.
    async fn transcribe_chunked(
        &self,
        upload: &UploadedMedia,
        prompt: Option<&str>,
    ) -> Result<(String, usize)> {
        let duration_ms = self.splitter.probe_duration_ms(&upload.path).await?;
        let spans = planner::plan(duration_ms, self.config.max_segment_ms)?;
        info!(
            request_id = %upload.id,
            size_bytes = upload.size_bytes,
            duration_ms,
            segments = spans.len(),
            "exceeds size limit, splitting"
        );

        let mut combined = String::new();
        for span in &spans {
            let segment_path = self
                .config
                .upload_dir
                .join(format!("{}_chunk_{}.mp3", upload.id, span.index + 1));
            let _segment_guard = FileGuard(segment_path.clone());

            self.splitter
                .export_segment(&upload.path, span, &segment_path)
                .await?;

            info!(
                request_id = %upload.id,
                segment = span.index + 1,
                total = spans.len(),
                "transcribing segment"
            );
            let text = self.transcriber.transcribe(&segment_path, prompt).await?;

            let trimmed = text.trim();
            if trimmed.is_empty() {
                warn!(
                    request_id = %upload.id,
                    segment = span.index + 1,
                    "segment produced no text"
                );
            } else {
                combined.push_str(trimmed);
                combined.push(' ');
            }
        }

        Ok((combined.trim().to_string(), spans.len()))
    }

    /// Kick off diarization for the original file. Never fatal: failures
    /// and skips are captured as status strings.
    async fn start_diarization(&self, upload: &UploadedMedia) -> DiarizationReport {
        let Some(diarizer) = &self.diarizer else {
            info!(request_id = %upload.id, "diarization requested but no credential configured, skipping");
            return DiarizationReport::status_only("skipped_no_key");
        };
        let Some(base) = &self.config.webhook_base_url else {
            info!(request_id = %upload.id, "diarization requested but no webhook base configured, skipping");
            return DiarizationReport::status_only("skipped_no_webhook_url");
        };

        let webhook_url = format!("{}/webhook/pyannote", base.trim_end_matches('/'));
        let mut report = DiarizationReport {
            webhook_used: Some(webhook_url.clone()),
            ..Default::default()
        };

        match diarizer
            .start_job(&upload.path, &upload.extension, &webhook_url)
            .await
        {
            Ok(job) => {
                report.job_id = job.job_id;
                report.status = Some(job.status);
            }
            Err(e) => {
                warn!(request_id = %upload.id, error = %e, "diarization failed, continuing without it");
                report.status = Some(format!("error: {e}"));
            }
        }
        report
    }

    /// Refine the transcript when requested and non-empty. A refinement
    /// failure becomes an explanatory string instead of an error.
    async fn maybe_refine(
        &self,
        upload: &UploadedMedia,
        opts: &TranscribeOptions,
        transcription: &str,
    ) -> Option<String> {
        if !opts.post_process {
            return None;
        }
        if transcription.is_empty() {
            info!(request_id = %upload.id, "transcript empty, skipping post-processing");
            return None;
        }

        info!(request_id = %upload.id, "post-processing transcript");
        match self
            .refiner
            .refine(
                transcription,
                opts.dictionary.as_deref(),
                opts.post_process_prompt.as_deref(),
            )
            .await
        {
            Ok(refined) => Some(refined),
            Err(e) => {
                warn!(request_id = %upload.id, error = %e, "post-processing failed");
                Some(format!("Error during post-processing: {e}"))
            }
        }
    }
}

/// Diarization fields of the outcome, filled in by `start_diarization`.
#[derive(Debug, Default)]
struct DiarizationReport {
    job_id: Option<String>,
    status: Option<String>,
    webhook_used: Option<String>,
}

impl DiarizationReport {
    fn status_only(status: &str) -> Self {
        Self {
            status: Some(status.to_string()),
            ..Default::default()
        }
    }
}

/// Combine the guidance prompt with a spelling instruction for the glossary
/// terms. The same string goes to every segment call.
fn build_effective_prompt(prompt: Option<&str>, dictionary: Option<&str>) -> Option<String> {
    let prompt = prompt.filter(|s| !s.trim().is_empty());
    let dictionary = dictionary.filter(|s| !s.trim().is_empty());
    match (prompt, dictionary) {
        (Some(p), Some(d)) => Some(format!(
            "{p}\n\nEnsure these terms are spelled correctly: {d}"
        )),
        (Some(p), None) => Some(p.to_string()),
        (None, Some(d)) => Some(format!("Ensure these terms are spelled correctly: {d}")),
        (None, None) => None,
    }
}

/// RAII guard that removes a transient file when dropped.
struct FileGuard(PathBuf);

impl Drop for FileGuard {
    fn drop(&mut self) {
        if self.0.exists() {
            if let Err(e) = std::fs::remove_file(&self.0) {
                warn!(path = %self.0.display(), error = %e, "failed to clean up transient file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::diarize::DiarizationJob;
    use crate::error::Error;
    use crate::planner::SegmentSpan;

    const MB: u64 = 1024 * 1024;

    struct FakeSplitter {
        duration_ms: u64,
        fail_probe: bool,
        fail_export: bool,
    }

    impl FakeSplitter {
        fn with_duration(duration_ms: u64) -> Self {
            Self {
                duration_ms,
                fail_probe: false,
                fail_export: false,
            }
        }
    }

    #[async_trait]
    impl MediaSplitter for FakeSplitter {
        async fn probe_duration_ms(&self, _path: &Path) -> Result<u64> {
            if self.fail_probe {
                return Err(Error::Probe("container is corrupt".into()));
            }
            Ok(self.duration_ms)
        }

        async fn export_segment(
            &self,
            _src: &Path,
            span: &SegmentSpan,
            dest: &Path,
        ) -> Result<()> {
            if self.fail_export {
                return Err(Error::SegmentExport("encoder crashed".into()));
            }
            std::fs::write(dest, format!("audio {}", span.index))?;
            Ok(())
        }
    }

    struct RecordedCall {
        file_name: String,
        prompt: Option<String>,
        files_in_dir: usize,
    }

    struct ScriptedTranscriber {
        responses: Mutex<VecDeque<Result<String>>>,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl ScriptedTranscriber {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TranscriptionGateway for ScriptedTranscriber {
        async fn transcribe(&self, audio_path: &Path, prompt: Option<&str>) -> Result<String> {
            let files_in_dir = audio_path
                .parent()
                .map(|dir| std::fs::read_dir(dir).unwrap().count())
                .unwrap_or(0);
            self.calls.lock().unwrap().push(RecordedCall {
                file_name: audio_path
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned(),
                prompt: prompt.map(str::to_string),
                files_in_dir,
            });
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("transcriber called more times than scripted")
        }
    }

    #[derive(Default)]
    struct FakeRefiner {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RefinementGateway for FakeRefiner {
        async fn refine(
            &self,
            transcript: &str,
            _dictionary: Option<&str>,
            _instruction: Option<&str>,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::Refinement("model overloaded".into()))
            } else {
                Ok(format!("polished: {transcript}"))
            }
        }
    }

    #[derive(Default)]
    struct FakeDiarizer {
        fail: bool,
        calls: AtomicUsize,
        seen_webhook: Mutex<Option<String>>,
    }

    #[async_trait]
    impl DiarizationGateway for FakeDiarizer {
        async fn start_job(
            &self,
            media_path: &Path,
            _extension: &str,
            webhook_url: &str,
        ) -> Result<DiarizationJob> {
            assert!(
                media_path.exists(),
                "original file must still exist when diarization runs"
            );
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_webhook.lock().unwrap() = Some(webhook_url.to_string());
            if self.fail {
                Err(Error::Diarization("upload rejected".into()))
            } else {
                Ok(DiarizationJob {
                    job_id: Some("job-123".into()),
                    status: "pending".into(),
                })
            }
        }
    }

    fn test_config(dir: &Path) -> Config {
        Config::new("sk-test").upload_dir(dir)
    }

    fn write_upload(dir: &Path, name: &str, claimed_size: u64) -> UploadedMedia {
        let id = Uuid::new_v4();
        let path = dir.join(format!("{id}_{name}"));
        std::fs::write(&path, b"fake media").unwrap();
        UploadedMedia::new(id, path, name, claimed_size).unwrap()
    }

    fn dir_entry_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_single_call_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![Ok("  hello world \n".into())]));
        let pipeline = Pipeline::new(
            test_config(dir.path()),
            Arc::new(FakeSplitter::with_duration(60_000)),
            transcriber.clone(),
            Arc::new(FakeRefiner::default()),
            None,
        );
        let upload = write_upload(dir.path(), "clip.mp3", 5 * MB);

        let outcome = pipeline
            .run(upload, &TranscribeOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.transcription, "hello world");
        assert_eq!(outcome.chunks_created, 1);
        assert_eq!(transcriber.call_count(), 1);
        assert!(outcome.post_processed_transcription.is_none());
        assert!(outcome.pyannote_job_id.is_none());
        assert!(outcome.pyannote_status.is_none());
        assert!(outcome.pyannote_webhook_used.is_none());
        assert_eq!(dir_entry_count(dir.path()), 0, "upload must be removed");
    }

    #[tokio::test]
    async fn test_threshold_is_exclusive() {
        // A file of exactly the threshold size stays on the single-call path.
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![Ok("at the limit".into())]));
        let pipeline = Pipeline::new(
            test_config(dir.path()),
            Arc::new(FakeSplitter::with_duration(3_600_000)),
            transcriber.clone(),
            Arc::new(FakeRefiner::default()),
            None,
        );
        let upload = write_upload(dir.path(), "edge.wav", 24 * MB);

        let outcome = pipeline
            .run(upload, &TranscribeOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.chunks_created, 1);
        assert_eq!(transcriber.call_count(), 1);
    }

    #[tokio::test]
    async fn test_chunked_path_three_segments_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![
            Ok("Alpha.".into()),
            Ok("  Beta.  ".into()),
            Ok("Gamma.".into()),
        ]));
        let pipeline = Pipeline::new(
            test_config(dir.path()),
            Arc::new(FakeSplitter::with_duration(40 * 60 * 1000)),
            transcriber.clone(),
            Arc::new(FakeRefiner::default()),
            None,
        );
        let upload = write_upload(dir.path(), "long.mp3", 60 * MB);
        let opts = TranscribeOptions::new()
            .prompt("Weekly sync")
            .dictionary("Grafana");

        let outcome = pipeline.run(upload, &opts).await.unwrap();

        assert_eq!(outcome.transcription, "Alpha. Beta. Gamma.");
        assert_eq!(outcome.chunks_created, 3);

        let calls = transcriber.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        for (i, call) in calls.iter().enumerate() {
            assert!(
                call.file_name.ends_with(&format!("_chunk_{}.mp3", i + 1)),
                "segments out of order: call {i} got {}",
                call.file_name
            );
            assert_eq!(
                call.prompt.as_deref(),
                Some("Weekly sync\n\nEnsure these terms are spelled correctly: Grafana"),
                "every segment gets the same effective prompt"
            );
            // Upload plus exactly the current segment file.
            assert_eq!(call.files_in_dir, 2);
        }
        drop(calls);
        assert_eq!(dir_entry_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_chunk_failure_aborts_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![
            Ok("Alpha.".into()),
            Err(Error::Transcription("status 500: upstream".into())),
            Ok("never reached".into()),
        ]));
        let pipeline = Pipeline::new(
            test_config(dir.path()),
            Arc::new(FakeSplitter::with_duration(40 * 60 * 1000)),
            transcriber.clone(),
            Arc::new(FakeRefiner::default()),
            None,
        );
        let upload = write_upload(dir.path(), "long.mp3", 60 * MB);

        let err = pipeline
            .run(upload, &TranscribeOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transcription(_)));
        assert_eq!(
            transcriber.call_count(),
            2,
            "third segment must not be attempted"
        );
        assert_eq!(
            dir_entry_count(dir.path()),
            0,
            "no artifacts may survive a failed run"
        );
    }

    #[tokio::test]
    async fn test_probe_failure_still_cleans_upload() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![]));
        let pipeline = Pipeline::new(
            test_config(dir.path()),
            Arc::new(FakeSplitter {
                duration_ms: 0,
                fail_probe: true,
                fail_export: false,
            }),
            transcriber.clone(),
            Arc::new(FakeRefiner::default()),
            None,
        );
        let upload = write_upload(dir.path(), "broken.mp4", 30 * MB);

        let err = pipeline
            .run(upload, &TranscribeOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Probe(_)));
        assert_eq!(transcriber.call_count(), 0);
        assert_eq!(dir_entry_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_export_failure_still_cleans_upload() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![]));
        let pipeline = Pipeline::new(
            test_config(dir.path()),
            Arc::new(FakeSplitter {
                duration_ms: 40 * 60 * 1000,
                fail_probe: false,
                fail_export: true,
            }),
            transcriber.clone(),
            Arc::new(FakeRefiner::default()),
            None,
        );
        let upload = write_upload(dir.path(), "long.mp3", 30 * MB);

        let err = pipeline
            .run(upload, &TranscribeOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SegmentExport(_)));
        assert_eq!(transcriber.call_count(), 0);
        assert_eq!(dir_entry_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_segment_skipped_in_concatenation() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![
            Ok("Alpha.".into()),
            Ok("   ".into()),
            Ok("Gamma.".into()),
        ]));
        let pipeline = Pipeline::new(
            test_config(dir.path()),
            Arc::new(FakeSplitter::with_duration(40 * 60 * 1000)),
            transcriber.clone(),
            Arc::new(FakeRefiner::default()),
            None,
        );
        let upload = write_upload(dir.path(), "long.mp3", 60 * MB);

        let outcome = pipeline
            .run(upload, &TranscribeOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.transcription, "Alpha. Gamma.");
        assert_eq!(outcome.chunks_created, 3);
    }

    #[tokio::test]
    async fn test_diarization_skipped_without_credential() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![Ok("words".into())]));
        let pipeline = Pipeline::new(
            test_config(dir.path()),
            Arc::new(FakeSplitter::with_duration(60_000)),
            transcriber.clone(),
            Arc::new(FakeRefiner::default()),
            None,
        );
        let upload = write_upload(dir.path(), "clip.mp3", MB);
        let opts = TranscribeOptions::new().request_diarization(true);

        let outcome = pipeline.run(upload, &opts).await.unwrap();

        assert_eq!(outcome.pyannote_status.as_deref(), Some("skipped_no_key"));
        assert!(outcome.pyannote_job_id.is_none());
        assert!(outcome.pyannote_webhook_used.is_none());
        assert_eq!(outcome.transcription, "words", "transcription still runs");
    }

    #[tokio::test]
    async fn test_diarization_skipped_without_webhook_base() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![Ok("words".into())]));
        let diarizer = Arc::new(FakeDiarizer::default());
        let pipeline = Pipeline::new(
            test_config(dir.path()),
            Arc::new(FakeSplitter::with_duration(60_000)),
            transcriber.clone(),
            Arc::new(FakeRefiner::default()),
            Some(diarizer.clone()),
        );
        let upload = write_upload(dir.path(), "clip.mp3", MB);
        let opts = TranscribeOptions::new().request_diarization(true);

        let outcome = pipeline.run(upload, &opts).await.unwrap();

        assert_eq!(
            outcome.pyannote_status.as_deref(),
            Some("skipped_no_webhook_url")
        );
        assert_eq!(diarizer.calls.load(Ordering::SeqCst), 0);
        assert!(outcome.pyannote_webhook_used.is_none());
    }

    #[tokio::test]
    async fn test_diarization_job_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![Ok("words".into())]));
        let diarizer = Arc::new(FakeDiarizer::default());
        let config = test_config(dir.path()).webhook_base_url("https://api.example.com/");
        let pipeline = Pipeline::new(
            config,
            Arc::new(FakeSplitter::with_duration(60_000)),
            transcriber.clone(),
            Arc::new(FakeRefiner::default()),
            Some(diarizer.clone()),
        );
        let upload = write_upload(dir.path(), "clip.mp3", MB);
        let opts = TranscribeOptions::new().request_diarization(true);

        let outcome = pipeline.run(upload, &opts).await.unwrap();

        assert_eq!(outcome.pyannote_job_id.as_deref(), Some("job-123"));
        assert_eq!(outcome.pyannote_status.as_deref(), Some("pending"));
        assert_eq!(
            outcome.pyannote_webhook_used.as_deref(),
            Some("https://api.example.com/webhook/pyannote"),
            "trailing slash on the base must not double up"
        );
        assert_eq!(diarizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            diarizer.seen_webhook.lock().unwrap().as_deref(),
            Some("https://api.example.com/webhook/pyannote")
        );
    }

    #[tokio::test]
    async fn test_diarization_failure_does_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![Ok("words".into())]));
        let diarizer = Arc::new(FakeDiarizer {
            fail: true,
            ..Default::default()
        });
        let config = test_config(dir.path()).webhook_base_url("https://api.example.com");
        let pipeline = Pipeline::new(
            config,
            Arc::new(FakeSplitter::with_duration(60_000)),
            transcriber.clone(),
            Arc::new(FakeRefiner::default()),
            Some(diarizer),
        );
        let upload = write_upload(dir.path(), "clip.mp3", MB);
        let opts = TranscribeOptions::new().request_diarization(true);

        let outcome = pipeline.run(upload, &opts).await.unwrap();

        let status = outcome.pyannote_status.unwrap();
        assert!(status.starts_with("error: "), "got status {status:?}");
        assert!(outcome.pyannote_job_id.is_none());
        assert_eq!(
            outcome.pyannote_webhook_used.as_deref(),
            Some("https://api.example.com/webhook/pyannote")
        );
        assert_eq!(outcome.transcription, "words");
    }

    #[tokio::test]
    async fn test_refinement_applied() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![Ok("raw text".into())]));
        let refiner = Arc::new(FakeRefiner::default());
        let pipeline = Pipeline::new(
            test_config(dir.path()),
            Arc::new(FakeSplitter::with_duration(60_000)),
            transcriber.clone(),
            refiner.clone(),
            None,
        );
        let upload = write_upload(dir.path(), "clip.mp3", MB);
        let opts = TranscribeOptions::new().post_process(true);

        let outcome = pipeline.run(upload, &opts).await.unwrap();

        assert_eq!(
            outcome.post_processed_transcription.as_deref(),
            Some("polished: raw text")
        );
        assert_eq!(refiner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refinement_skipped_when_transcript_empty() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![Ok("   \n ".into())]));
        let refiner = Arc::new(FakeRefiner::default());
        let pipeline = Pipeline::new(
            test_config(dir.path()),
            Arc::new(FakeSplitter::with_duration(60_000)),
            transcriber.clone(),
            refiner.clone(),
            None,
        );
        let upload = write_upload(dir.path(), "quiet.mp3", MB);
        let opts = TranscribeOptions::new().post_process(true);

        let outcome = pipeline.run(upload, &opts).await.unwrap();

        assert_eq!(outcome.transcription, "");
        assert!(outcome.post_processed_transcription.is_none());
        assert_eq!(refiner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refinement_failure_reported_in_field() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![Ok("raw text".into())]));
        let refiner = Arc::new(FakeRefiner {
            fail: true,
            ..Default::default()
        });
        let pipeline = Pipeline::new(
            test_config(dir.path()),
            Arc::new(FakeSplitter::with_duration(60_000)),
            transcriber.clone(),
            refiner,
            None,
        );
        let upload = write_upload(dir.path(), "clip.mp3", MB);
        let opts = TranscribeOptions::new().post_process(true);

        let outcome = pipeline.run(upload, &opts).await.unwrap();

        let refined = outcome.post_processed_transcription.unwrap();
        assert!(
            refined.starts_with("Error during post-processing: "),
            "got {refined:?}"
        );
        assert_eq!(outcome.transcription, "raw text", "raw transcript is kept");
    }

    #[tokio::test]
    async fn test_processing_time_has_two_decimals() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(ScriptedTranscriber::new(vec![Ok("t".into())]));
        let pipeline = Pipeline::new(
            test_config(dir.path()),
            Arc::new(FakeSplitter::with_duration(60_000)),
            transcriber,
            Arc::new(FakeRefiner::default()),
            None,
        );
        let upload = write_upload(dir.path(), "clip.mp3", MB);

        let outcome = pipeline
            .run(upload, &TranscribeOptions::default())
            .await
            .unwrap();

        let (_, decimals) = outcome.processing_time.split_once('.').unwrap();
        assert_eq!(decimals.len(), 2);
        assert!(outcome.processing_time.parse::<f64>().is_ok());
    }

    #[test]
    fn test_effective_prompt_combinations() {
        assert_eq!(build_effective_prompt(None, None), None);
        assert_eq!(
            build_effective_prompt(Some("ctx"), None),
            Some("ctx".to_string())
        );
        assert_eq!(
            build_effective_prompt(None, Some("ACME, Foobar")),
            Some("Ensure these terms are spelled correctly: ACME, Foobar".to_string())
        );
        assert_eq!(
            build_effective_prompt(Some("ctx"), Some("ACME")),
            Some("ctx\n\nEnsure these terms are spelled correctly: ACME".to_string())
        );
        assert_eq!(build_effective_prompt(Some("  "), Some(" ")), None);
    }

    #[test]
    fn test_file_guard_removes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transient.mp3");
        std::fs::write(&path, b"x").unwrap();
        {
            let _guard = FileGuard(path.clone());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_file_guard_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never_created.mp3");
        let _guard = FileGuard(path);
    }
}
