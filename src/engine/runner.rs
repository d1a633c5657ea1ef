//! # Transcription Stage Runner
//!
//! Drives one job from `processing` to a terminal (or parked) state,
//! emitting progress/stage updates and honoring cancellation and pause at
//! well-defined checkpoints.
//!
//! ## Pipeline:
//! 1. `loading_model` (10%): capability resolution, model cache acquire
//! 2. `transcribing` (30%): the backend call, the long blocking part
//! 3. `diarizing` (70%): only when a diarizer resolved; atomic, no pause
//! 4. `finalizing` (90%): artifact persistence
//! 5. `completed` (100%): outputs populated
//!
//! ## Checkpoints:
//! Between stages the record is re-read from the store: a `cancelling`
//! status finalizes to `cancelled`, a `pausing` status parks the job as
//! `paused`. Cancellation is cooperative; there is no hard kill of a
//! transcription call already in flight.
//!
//! ## Failure policy:
//! Any error re-checks cancellation first (a cancel racing a failure wins),
//! then finalizes to `failed` with `error_message` set. Failures are not
//! retried; a retry is a new job via restart.

use crate::artifacts::{self, TranscriptSidecar};
use crate::error::{EngineError, EngineResult};
use crate::job::store::JobStore;
use crate::job::{Job, JobStatus, Stage};
use crate::transcription::backend::{
    normalize_segments, BackendError, RawTranscript, TranscribeOptions, TranscriptionBackend,
};
use crate::transcription::cache::ModelCache;
use crate::transcription::capability::{AvailabilityProvider, CapabilityResolver};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::queue::JobExecutor;

/// What a checkpoint told us to do.
enum Checkpoint {
    Continue(Job),
    /// The job was finalized (cancelled or paused); stop here.
    Halt,
}

/// Executes the staged pipeline for one job at a time.
///
/// All collaborators are injected: the store, the opaque backend, the
/// shared model cache, the resolver and the availability snapshot source.
pub struct StageRunner {
    store: Arc<dyn JobStore>,
    backend: Arc<dyn TranscriptionBackend>,
    cache: Arc<ModelCache>,
    resolver: CapabilityResolver,
    availability: Arc<dyn AvailabilityProvider>,
    transcript_dir: PathBuf,
}

impl StageRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        backend: Arc<dyn TranscriptionBackend>,
        cache: Arc<ModelCache>,
        resolver: CapabilityResolver,
        availability: Arc<dyn AvailabilityProvider>,
        transcript_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            backend,
            cache,
            resolver,
            availability,
            transcript_dir,
        }
    }

    /// Drive one job. Never returns an error for job-level failures (those
    /// land on the record as `failed`); only store access problems propagate.
    pub async fn run_job(&self, job_id: Uuid) -> EngineResult<()> {
        let mut job = self.store.get_job(job_id).await?;

        // A cancel may have landed between enqueue and pickup.
        match job.status {
            JobStatus::Cancelled => return Ok(()),
            JobStatus::Cancelling => {
                return self.finalize_cancelled(job).await;
            }
            JobStatus::Queued => {}
            other => {
                tracing::warn!("Job {} picked up in unexpected state {}", job_id, other);
                return Ok(());
            }
        }

        job.transition(JobStatus::Processing)?;
        job.set_progress(10, Stage::LoadingModel);
        let run_started = Utc::now();
        self.store.save_job(job.clone()).await?;
        tracing::info!("Job {} entered processing", job_id);

        let outcome = self.run_stages(job, run_started).await;

        match outcome {
            Ok(()) => Ok(()),
            Err(err) => self.fail_or_cancel(job_id, run_started, err).await,
        }
    }

    /// Steps 3-9 of the pipeline. Returns Ok both for completion and for a
    /// checkpoint halt (cancel/pause finalized inside).
    async fn run_stages(&self, job: Job, run_started: chrono::DateTime<Utc>) -> EngineResult<()> {
        let job_id = job.id;

        let job = match self.checkpoint(job_id, run_started).await? {
            Checkpoint::Continue(job) => job,
            Checkpoint::Halt => return Ok(()),
        };

        // Resolve concrete backends from preferences + availability.
        let snapshot = self.availability.snapshot();
        let asr = self
            .resolver
            .resolve_asr(job.inputs.requested_model.as_deref(), &snapshot);
        let model_id = asr.selection.clone().ok_or_else(|| {
            EngineError::ModelNotFound("no ASR model is available".to_string())
        })?;
        let diarizer = if job.inputs.has_speaker_labels {
            self.resolver
                .resolve_diarizer(job.inputs.requested_diarizer.as_deref(), &snapshot)
        } else {
            crate::transcription::capability::Resolution {
                selection: None,
                notes: Vec::new(),
            }
        };
        let mut notes: Vec<String> = asr.notes;
        notes.extend(diarizer.notes.iter().cloned());
        for note in &notes {
            tracing::info!("Job {}: {}", job_id, note);
        }

        // May block behind another worker loading the same model.
        let handle = self.cache.acquire(&model_id, self.backend.as_ref()).await?;

        let mut job = match self.checkpoint(job_id, run_started).await? {
            Checkpoint::Continue(job) => job,
            Checkpoint::Halt => return Ok(()),
        };

        job.set_progress(30, Stage::Transcribing);
        job.model_used = Some(model_id.clone());
        self.store.save_job(job.clone()).await?;

        let job = match self.checkpoint(job_id, run_started).await? {
            Checkpoint::Continue(job) => job,
            Checkpoint::Halt => return Ok(()),
        };

        let options = TranscribeOptions {
            language: None,
            with_timestamps: job.inputs.has_timestamps,
        };
        let audio_path = Path::new(&job.inputs.file_path).to_path_buf();
        let transcript = self
            .backend
            .transcribe(&handle, &audio_path, &options)
            .await
            .map_err(map_backend_error)?;

        // Cancellation racing the transcribe call is honored before results
        // are committed.
        let mut job = match self.checkpoint(job_id, run_started).await? {
            Checkpoint::Continue(job) => job,
            Checkpoint::Halt => return Ok(()),
        };

        // Diarization is an atomic sub-stage: the control surface rejects
        // pause while this stage label is set, and there is no checkpoint
        // inside it.
        let mut speaker_count = None;
        if let Some(diarizer_id) = diarizer.selection.as_deref() {
            job.set_progress(70, Stage::Diarizing);
            job.diarizer_used = Some(diarizer_id.to_string());
            self.store.save_job(job.clone()).await?;

            match self.backend.diarize(diarizer_id, &audio_path).await {
                Ok(output) => speaker_count = Some(output.speaker_count),
                Err(err) => {
                    // Speaker labels are optional; degrade instead of failing.
                    tracing::warn!("Job {} diarization failed: {}", job_id, err);
                    notes.push(format!("diarization failed and was skipped: {}", err));
                    job.diarizer_used = None;
                }
            }
        }

        job.set_progress(90, Stage::Finalizing);
        self.store.save_job(job.clone()).await?;

        let segments = normalize_segments(&transcript.segments);
        let sidecar = TranscriptSidecar {
            job_id,
            language: transcript.language.clone(),
            duration: transcript.duration,
            model_used: model_id.clone(),
            diarizer_used: job.diarizer_used.clone(),
            speaker_count,
            notes,
            segments,
        };
        let transcript_path =
            artifacts::write_transcript(&self.transcript_dir, &transcript.text, &sidecar).await?;

        self.finalize_completed(job, &transcript, transcript_path, speaker_count, run_started)
            .await
    }

    /// Re-read the record and act on cancel/pause flags.
    async fn checkpoint(
        &self,
        job_id: Uuid,
        run_started: chrono::DateTime<Utc>,
    ) -> EngineResult<Checkpoint> {
        let job = self.store.get_job(job_id).await?;
        match job.status {
            JobStatus::Cancelling | JobStatus::Cancelled => {
                self.finalize_cancelled_with_time(job, run_started).await?;
                Ok(Checkpoint::Halt)
            }
            JobStatus::Pausing => {
                self.finalize_paused(job, run_started).await?;
                Ok(Checkpoint::Halt)
            }
            _ => Ok(Checkpoint::Continue(job)),
        }
    }

    async fn finalize_cancelled(&self, job: Job) -> EngineResult<()> {
        self.finalize_cancelled_with_time(job, Utc::now()).await
    }

    async fn finalize_cancelled_with_time(
        &self,
        mut job: Job,
        run_started: chrono::DateTime<Utc>,
    ) -> EngineResult<()> {
        if job.status != JobStatus::Cancelled {
            job.transition(JobStatus::Cancelled)?;
        }
        job.processing_seconds += elapsed_seconds(run_started);
        self.store.save_job(job.clone()).await?;
        tracing::info!("Job {} finalized as cancelled", job.id);
        Ok(())
    }

    /// Park the job: status `paused`, progress frozen, bookkeeping updated.
    /// The record routes back to `queued` on resume.
    async fn finalize_paused(
        &self,
        mut job: Job,
        run_started: chrono::DateTime<Utc>,
    ) -> EngineResult<()> {
        job.transition(JobStatus::Paused)?;
        job.processing_seconds += elapsed_seconds(run_started);
        job.checkpoint_path = Some(
            self.transcript_dir
                .join(format!("{}.checkpoint", job.id))
                .to_string_lossy()
                .into_owned(),
        );
        self.store.save_job(job.clone()).await?;
        tracing::info!("Job {} parked as paused", job.id);
        Ok(())
    }

    async fn finalize_completed(
        &self,
        mut job: Job,
        transcript: &RawTranscript,
        transcript_path: PathBuf,
        speaker_count: Option<u32>,
        run_started: chrono::DateTime<Utc>,
    ) -> EngineResult<()> {
        job.set_progress(100, Stage::Finalizing);
        job.transition(JobStatus::Completed)?;
        job.processing_seconds += elapsed_seconds(run_started);
        job.transcript_path = Some(transcript_path.to_string_lossy().into_owned());
        job.language_detected = Some(transcript.language.clone());
        job.duration = Some(transcript.duration);
        job.speaker_count = speaker_count;
        self.store.save_job(job.clone()).await?;
        tracing::info!(
            "Job {} completed ({:.1}s audio, language {})",
            job.id,
            transcript.duration,
            transcript.language
        );
        Ok(())
    }

    /// Error path for steps 4-9: a cancel racing the failure wins.
    async fn fail_or_cancel(
        &self,
        job_id: Uuid,
        run_started: chrono::DateTime<Utc>,
        err: EngineError,
    ) -> EngineResult<()> {
        let mut job = self.store.get_job(job_id).await?;

        if matches!(job.status, JobStatus::Cancelling | JobStatus::Cancelled) {
            tracing::info!(
                "Job {} failed after a cancel request; cancellation wins",
                job_id
            );
            return self.finalize_cancelled_with_time(job, run_started).await;
        }

        // A pause racing the failure parks the job instead of failing it,
        // so the user can resume and retry. `pausing` has no edge to
        // `failed`; leaving it would wedge the record.
        if job.status == JobStatus::Pausing {
            tracing::info!(
                "Job {} failed after a pause request; parking for resume: {}",
                job_id,
                err
            );
            return self.finalize_paused(job, run_started).await;
        }

        tracing::error!("Job {} failed: {}", job_id, err);
        job.transition(JobStatus::Failed)?;
        job.error_message = Some(err.to_string());
        job.processing_seconds += elapsed_seconds(run_started);
        self.store.save_job(job).await?;
        Ok(())
    }
}

#[async_trait]
impl JobExecutor for StageRunner {
    async fn execute(&self, job_id: Uuid) -> anyhow::Result<()> {
        self.run_job(job_id).await.map_err(|e| anyhow::anyhow!(e))
    }
}

fn map_backend_error(err: BackendError) -> EngineError {
    match err {
        BackendError::ModelNotFound(msg) => EngineError::ModelNotFound(msg),
        BackendError::TranscriptionFailed(msg) => EngineError::TranscriptionFailed(msg),
        BackendError::DiarizationFailed(msg) => EngineError::TranscriptionFailed(msg),
    }
}

fn elapsed_seconds(since: chrono::DateTime<Utc>) -> i64 {
    (Utc::now() - since).num_seconds().max(0)
}
