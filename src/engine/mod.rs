//! # Job Engine
//!
//! The control surface the HTTP layer talks to: submit, cancel, pause,
//! resume, restart and concurrency changes, wired over the job store, the
//! worker-pool queue and the staged runner.
//!
//! All lifecycle edges go through [`crate::job::Job::transition`]; this
//! module only decides *which* edge each operation takes from the current
//! status, per the lifecycle table.

pub mod queue;
pub mod runner;
pub mod stall;

use crate::config::AppConfig;
use crate::error::{EngineError, EngineResult};
use crate::job::store::JobStore;
use crate::job::{Job, JobInputs, JobStatus, Stage};
use crate::transcription::backend::TranscriptionBackend;
use crate::transcription::cache::ModelCache;
use crate::transcription::capability::{AvailabilityProvider, CapabilityResolver};
use queue::JobQueue;
use runner::StageRunner;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Everything the HTTP layer supplies when submitting a file.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub file_path: String,
    pub requested_model: Option<String>,
    pub requested_diarizer: Option<String>,
    #[serde(default)]
    pub has_timestamps: bool,
    #[serde(default)]
    pub has_speaker_labels: bool,
    /// Estimated processing time when the caller probed the file
    pub estimated_total_seconds: Option<i64>,
}

/// Facade over store + queue + runner.
pub struct Engine {
    store: Arc<dyn JobStore>,
    queue: Arc<JobQueue>,
    cache: Arc<ModelCache>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn JobStore>,
        backend: Arc<dyn TranscriptionBackend>,
        availability: Arc<dyn AvailabilityProvider>,
        config: &AppConfig,
    ) -> Self {
        let resolver = CapabilityResolver::new(
            config.models.default_asr_model.clone(),
            config.models.default_diarizer.clone(),
            config.models.diarization_enabled,
        );
        let cache = Arc::new(ModelCache::new());
        let runner = Arc::new(StageRunner::new(
            store.clone(),
            backend,
            cache.clone(),
            resolver,
            availability,
            PathBuf::from(&config.storage.transcript_dir),
        ));
        let queue = Arc::new(JobQueue::new(runner, config.engine.worker_concurrency));

        Self {
            store,
            queue,
            cache,
        }
    }

    /// Create a queued record for the request and hand its ID to the queue.
    pub async fn submit(&self, request: SubmitRequest) -> EngineResult<Job> {
        let inputs = JobInputs {
            file_path: request.file_path,
            requested_model: request.requested_model,
            requested_diarizer: request.requested_diarizer,
            has_timestamps: request.has_timestamps,
            has_speaker_labels: request.has_speaker_labels,
        };
        let job = Job::new(inputs, request.estimated_total_seconds);
        self.store.save_job(job.clone()).await?;
        self.queue.enqueue(job.id).await?;
        tracing::info!("Job {} submitted for {}", job.id, job.inputs.file_path);
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> EngineResult<Job> {
        self.store.get_job(id).await
    }

    /// Put an existing queued record (back) onto the queue.
    pub async fn enqueue(&self, id: Uuid) -> EngineResult<()> {
        self.queue.enqueue(id).await
    }

    /// Request cancellation.
    ///
    /// Queued and paused jobs have nothing in flight to drain, so they flip
    /// to `cancelled` synchronously. In-flight jobs are marked `cancelling`
    /// and the runner finalizes them at its next checkpoint.
    pub async fn cancel(&self, id: Uuid) -> EngineResult<Job> {
        let mut job = self.store.get_job(id).await?;
        match job.status {
            JobStatus::Queued | JobStatus::Paused => job.transition(JobStatus::Cancelled)?,
            JobStatus::Processing | JobStatus::Pausing => {
                job.transition(JobStatus::Cancelling)?
            }
            // Already draining; nothing more to request.
            JobStatus::Cancelling => return Ok(job),
            other => {
                return Err(EngineError::InvalidState(format!(
                    "cannot cancel job {} in state {}",
                    id, other
                )))
            }
        }
        self.store.save_job(job.clone()).await?;
        tracing::info!("Job {} cancel requested (now {})", id, job.status);
        Ok(job)
    }

    /// Request a pause.
    ///
    /// Forbidden while the job is in its diarizing sub-stage (atomic).
    /// Queued jobs park immediately; in-flight ones are marked `pausing`
    /// and parked by the runner at its next checkpoint.
    pub async fn pause(&self, id: Uuid) -> EngineResult<Job> {
        let mut job = self.store.get_job(id).await?;

        if job.progress_stage == Some(Stage::Diarizing) {
            return Err(EngineError::InvalidState(format!(
                "job {} is diarizing and cannot be paused",
                id
            )));
        }

        match job.status {
            JobStatus::Queued => {
                job.pause_requested_at = Some(chrono::Utc::now());
                job.transition(JobStatus::Paused)?;
            }
            JobStatus::Processing => {
                job.pause_requested_at = Some(chrono::Utc::now());
                job.transition(JobStatus::Pausing)?;
            }
            other => {
                return Err(EngineError::InvalidState(format!(
                    "cannot pause job {} in state {}",
                    id, other
                )))
            }
        }
        self.store.save_job(job.clone()).await?;
        tracing::info!("Job {} pause requested (now {})", id, job.status);
        Ok(job)
    }

    /// Resume a paused job: route it back to `queued` and re-enqueue.
    pub async fn resume(&self, id: Uuid) -> EngineResult<Job> {
        let mut job = self.store.get_job(id).await?;
        if job.status != JobStatus::Paused {
            return Err(EngineError::InvalidState(format!(
                "cannot resume job {} in state {}",
                id, job.status
            )));
        }

        job.transition(JobStatus::Queued)?;
        job.pause_requested_at = None;
        job.paused_at = None;
        job.checkpoint_path = None;
        job.resume_count += 1;
        self.store.save_job(job.clone()).await?;
        self.queue.enqueue(id).await?;
        tracing::info!("Job {} resumed (resume #{})", id, job.resume_count);
        Ok(job)
    }

    /// Retry a finished job as a brand-new record copying the static
    /// inputs. The original record is untouched.
    pub async fn restart(&self, id: Uuid) -> EngineResult<Job> {
        let original = self.store.get_job(id).await?;
        if !original.status.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "cannot restart job {} in non-terminal state {}",
                id, original.status
            )));
        }

        let fresh = Job::new(original.inputs.clone(), original.estimated_total_seconds);
        self.store.save_job(fresh.clone()).await?;
        self.queue.enqueue(fresh.id).await?;
        tracing::info!("Job {} restarted as {}", id, fresh.id);
        Ok(fresh)
    }

    /// Resize the worker pool (drain-then-restart; never kills a job).
    pub async fn set_concurrency(&self, n: usize) -> EngineResult<()> {
        self.queue.set_concurrency(n).await
    }

    /// Current queue shape for health reporting.
    pub async fn queue_stats(&self) -> EngineResult<QueueStats> {
        Ok(QueueStats {
            concurrency: self.queue.concurrency().await,
            workers: self.queue.worker_count().await,
            pending: self.queue.pending_count(),
            running: self.queue.running_count(),
            queued_jobs: self.store.count_jobs(JobStatus::Queued).await?,
            processing_jobs: self.store.count_jobs(JobStatus::Processing).await?,
        })
    }

    /// Number of models currently resident in the shared cache.
    pub fn loaded_models(&self) -> usize {
        self.cache.loaded_count()
    }

    /// Drain the workers for shutdown.
    pub async fn shutdown(&self) {
        self.queue.stop().await;
    }
}

/// Snapshot of the queue for the health endpoint.
#[derive(Debug, serde::Serialize)]
pub struct QueueStats {
    pub concurrency: usize,
    pub workers: usize,
    pub pending: usize,
    pub running: usize,
    pub queued_jobs: usize,
    pub processing_jobs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::store::InMemoryJobStore;
    use crate::transcription::backend::{
        BackendError, DiarizationOutput, ModelHandle, RawTranscript, TranscribeOptions,
    };
    use crate::transcription::capability::{
        BackendAvailability, CapabilitySnapshot, StaticAvailability,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct HelloBackend {
        transcribe_calls: AtomicUsize,
    }

    #[async_trait]
    impl TranscriptionBackend for HelloBackend {
        async fn load_model(&self, model_id: &str) -> Result<ModelHandle, BackendError> {
            Ok(ModelHandle {
                model_id: model_id.to_string(),
                inner: Arc::new(()),
            })
        }

        async fn transcribe(
            &self,
            _model: &ModelHandle,
            _audio_path: &Path,
            _options: &TranscribeOptions,
        ) -> Result<RawTranscript, BackendError> {
            self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(RawTranscript {
                text: "hello".to_string(),
                segments: vec![json!({"start": 0.0, "end": 1.0, "text": "hello"})],
                language: "en".to_string(),
                duration: 1.0,
            })
        }

        async fn diarize(
            &self,
            _diarizer_id: &str,
            _audio_path: &Path,
        ) -> Result<DiarizationOutput, BackendError> {
            Ok(DiarizationOutput { speaker_count: 2 })
        }
    }

    struct Fixture {
        engine: Engine,
        store: Arc<InMemoryJobStore>,
        backend: Arc<HelloBackend>,
        _tmp: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.transcript_dir = tmp.path().to_string_lossy().into_owned();

        let store = Arc::new(InMemoryJobStore::new());
        let backend = Arc::new(HelloBackend {
            transcribe_calls: AtomicUsize::new(0),
        });
        let availability = Arc::new(StaticAvailability::new(CapabilitySnapshot {
            asr: vec![BackendAvailability::available("medium")],
            diarizers: vec![BackendAvailability::available("pyannote")],
        }));
        let engine = Engine::new(store.clone(), backend.clone(), availability, &config);
        Fixture {
            engine,
            store,
            backend,
            _tmp: tmp,
        }
    }

    fn request() -> SubmitRequest {
        SubmitRequest {
            file_path: "/tmp/meeting.wav".to_string(),
            requested_model: None,
            requested_diarizer: None,
            has_timestamps: true,
            has_speaker_labels: false,
            estimated_total_seconds: Some(60),
        }
    }

    async fn wait_for_terminal(fx: &Fixture, id: Uuid) -> Job {
        for _ in 0..100 {
            let job = fx.store.get_job(id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }

    #[tokio::test]
    async fn test_end_to_end_submit_to_completed() {
        let fx = fixture();
        let job = fx.engine.submit(request()).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let done = wait_for_terminal(&fx, job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress_percent, 100);
        assert!(done.completed_at.is_some());

        let text = std::fs::read_to_string(done.transcript_path.unwrap()).unwrap();
        assert!(text.contains("hello"));
        fx.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_queued_job_is_synchronous_and_backend_free() {
        let fx = fixture();
        // Seed a queued record without ever enqueueing it, so no worker
        // races the cancel.
        let job = Job::new(
            JobInputs {
                file_path: "/tmp/a.wav".to_string(),
                requested_model: None,
                requested_diarizer: None,
                has_timestamps: false,
                has_speaker_labels: false,
            },
            None,
        );
        let id = job.id;
        fx.store.save_job(job).await.unwrap();

        let cancelled = fx.engine.cancel(id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());
        assert_eq!(fx.backend.transcribe_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_is_invalid_state() {
        let fx = fixture();
        let job = fx.engine.submit(request()).await.unwrap();
        wait_for_terminal(&fx, job.id).await;

        let err = fx.engine.cancel(job.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        fx.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_pause_rejected_during_diarizing_stage() {
        let fx = fixture();
        let mut job = Job::new(
            JobInputs {
                file_path: "/tmp/a.wav".to_string(),
                requested_model: None,
                requested_diarizer: None,
                has_timestamps: false,
                has_speaker_labels: true,
            },
            None,
        );
        job.transition(JobStatus::Processing).unwrap();
        job.set_progress(70, Stage::Diarizing);
        let id = job.id;
        fx.store.save_job(job).await.unwrap();

        let err = fx.engine.pause(id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let unchanged = fx.store.get_job(id).await.unwrap();
        assert_eq!(unchanged.status, JobStatus::Processing);
        assert_eq!(unchanged.progress_stage, Some(Stage::Diarizing));
    }

    #[tokio::test]
    async fn test_pause_queued_then_resume_requeues() {
        let fx = fixture();
        let job = Job::new(
            JobInputs {
                file_path: "/tmp/meeting.wav".to_string(),
                requested_model: None,
                requested_diarizer: None,
                has_timestamps: false,
                has_speaker_labels: false,
            },
            None,
        );
        let id = job.id;
        fx.store.save_job(job).await.unwrap();

        let paused = fx.engine.pause(id).await.unwrap();
        assert_eq!(paused.status, JobStatus::Paused);
        assert!(paused.paused_at.is_some());

        let resumed = fx.engine.resume(id).await.unwrap();
        assert_eq!(resumed.status, JobStatus::Queued);
        assert_eq!(resumed.resume_count, 1);
        assert!(resumed.paused_at.is_none());
        assert!(resumed.pause_requested_at.is_none());

        let done = wait_for_terminal(&fx, id).await;
        assert_eq!(done.status, JobStatus::Completed);
        fx.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_resume_requires_paused() {
        let fx = fixture();
        let job = fx.engine.submit(request()).await.unwrap();
        wait_for_terminal(&fx, job.id).await;

        let err = fx.engine.resume(job.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        fx.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_creates_fresh_record_and_leaves_original() {
        let fx = fixture();
        let job = fx.engine.submit(request()).await.unwrap();
        let original = wait_for_terminal(&fx, job.id).await;

        let fresh = fx.engine.restart(job.id).await.unwrap();
        assert_ne!(fresh.id, job.id);
        assert_eq!(fresh.inputs.file_path, original.inputs.file_path);

        let done = wait_for_terminal(&fx, fresh.id).await;
        assert_eq!(done.status, JobStatus::Completed);

        // Original untouched by the restart.
        let untouched = fx.store.get_job(job.id).await.unwrap();
        assert_eq!(untouched.completed_at, original.completed_at);
        fx.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_rejected_for_running_job() {
        let fx = fixture();
        let job = Job::new(
            JobInputs {
                file_path: "/tmp/a.wav".to_string(),
                requested_model: None,
                requested_diarizer: None,
                has_timestamps: false,
                has_speaker_labels: false,
            },
            None,
        );
        let id = job.id;
        fx.store.save_job(job).await.unwrap();

        let err = fx.engine.restart(id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_set_concurrency_propagates_invalid_argument() {
        let fx = fixture();
        let err = fx.engine.set_concurrency(0).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        assert!(fx.engine.set_concurrency(5).await.is_ok());
        let stats = fx.engine.queue_stats().await.unwrap();
        assert_eq!(stats.workers, 5);
        fx.engine.shutdown().await;
    }
}
