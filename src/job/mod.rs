//! # Job Records & Lifecycle
//!
//! The persisted unit of work for the transcription engine: one record per
//! uploaded file, mutated by the stage runner during execution and by the
//! control surface (cancel/pause/resume/restart).
//!
//! ## State Machine:
//! `queued → processing → {completed | failed | cancelled}`, with two side
//! branches:
//! - `processing → cancelling → cancelled` (cooperative cancellation)
//! - `queued|processing → pausing|paused → queued` (pause routes back to
//!   queued so the job re-enters the dispatch pipeline on resume)
//!
//! All edges go through [`Job::transition`], which rejects anything not in
//! the table and enforces the terminal-state invariants (completed_at set,
//! stage/ETA cleared) in one place.

pub mod store;

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, waiting for a worker slot
    Queued,

    /// A worker is driving the staged pipeline
    Processing,

    /// Cancellation requested; the runner will drain to its next checkpoint
    Cancelling,

    /// Terminal: cancelled by the user
    Cancelled,

    /// Pause requested; the runner will park the job at its next checkpoint
    Pausing,

    /// Parked; resume routes the job back to `Queued`
    Paused,

    /// Terminal: transcript produced
    Completed,

    /// Terminal: unrecoverable error (retries are a new job via restart)
    Failed,
}

impl JobStatus {
    /// Terminal states are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// States owned by a running worker.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            JobStatus::Processing | JobStatus::Cancelling | JobStatus::Pausing
        )
    }

    /// Legal edges of the lifecycle graph.
    fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (*self, to),
            (Queued, Processing)
                | (Queued, Cancelled)
                | (Queued, Paused)
                | (Processing, Cancelling)
                | (Processing, Pausing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Cancelling, Cancelled)
                | (Pausing, Paused)
                | (Pausing, Cancelling)
                | (Paused, Queued)
                | (Paused, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Pausing => "pausing",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named phase of a job's execution, surfaced as `progress_stage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    LoadingModel,
    Transcribing,
    /// Atomic sub-stage: pause requests are rejected while this is set
    Diarizing,
    Finalizing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::LoadingModel => "loading_model",
            Stage::Transcribing => "transcribing",
            Stage::Diarizing => "diarizing",
            Stage::Finalizing => "finalizing",
        }
    }
}

/// Static inputs captured at submit time; `restart` copies exactly these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInputs {
    /// Path to the uploaded audio/video file
    pub file_path: String,

    /// ASR model the user asked for (resolver may substitute)
    pub requested_model: Option<String>,

    /// Diarization backend the user asked for (resolver may substitute)
    pub requested_diarizer: Option<String>,

    /// Whether segment timestamps are wanted in the output
    pub has_timestamps: bool,

    /// Whether speaker labels (diarization) are wanted in the output
    pub has_speaker_labels: bool,
}

/// The central entity: one transcription request and its execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique ID, immutable after creation
    pub id: Uuid,

    pub status: JobStatus,

    /// 0-100; monotonically non-decreasing while processing, frozen across
    /// a pause/resume cycle
    pub progress_percent: u8,

    /// Current pipeline stage; always None in terminal states
    pub progress_stage: Option<Stage>,

    /// Seconds of work believed to remain; always None in terminal states
    pub estimated_time_left: Option<i64>,

    /// Estimated total processing time, supplied at submit when known
    pub estimated_total_seconds: Option<i64>,

    /// Monotonic accumulator of actual processing time across pause/resume
    pub processing_seconds: i64,

    /// Set by the stall detector when progress stops advancing; cleared the
    /// next time the record is saved with fresh progress
    pub stalled_at: Option<DateTime<Utc>>,

    pub error_message: Option<String>,

    // Pause/cancel bookkeeping
    pub pause_requested_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resume_count: u32,
    /// Where mid-job state would be persisted for resumable backends
    pub checkpoint_path: Option<String>,

    // Timestamps
    pub created_at: DateTime<Utc>,
    /// Bumped on every save; the stall detector's progress signal
    pub updated_at: DateTime<Utc>,
    /// Set on first entry into `processing`, never changed afterwards
    pub started_at: Option<DateTime<Utc>>,
    /// Set if and only if the job has reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    pub inputs: JobInputs,

    // Outputs, populated on completion
    pub transcript_path: Option<String>,
    pub language_detected: Option<String>,
    pub duration: Option<f64>,
    pub speaker_count: Option<u32>,
    pub model_used: Option<String>,
    pub diarizer_used: Option<String>,
}

impl Job {
    /// Create a fresh queued record for the given inputs.
    pub fn new(inputs: JobInputs, estimated_total_seconds: Option<i64>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            progress_percent: 0,
            progress_stage: None,
            estimated_time_left: None,
            estimated_total_seconds,
            processing_seconds: 0,
            stalled_at: None,
            error_message: None,
            pause_requested_at: None,
            paused_at: None,
            resume_count: 0,
            checkpoint_path: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            inputs,
            transcript_path: None,
            language_detected: None,
            duration: None,
            speaker_count: None,
            model_used: None,
            diarizer_used: None,
        }
    }

    /// Move the record to a new status, validating the edge.
    ///
    /// ## Invariants enforced here:
    /// - Illegal edges fail with `InvalidState` and leave the record unchanged
    /// - `started_at` is set exactly once, on first entry into `processing`
    /// - Terminal states set `completed_at` and clear `progress_stage` /
    ///   `estimated_time_left`
    /// - Entering `paused` records `paused_at`
    pub fn transition(&mut self, to: JobStatus) -> EngineResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(EngineError::InvalidState(format!(
                "job {} cannot transition from {} to {}",
                self.id, self.status, to
            )));
        }

        self.status = to;

        match to {
            JobStatus::Processing => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            JobStatus::Paused => {
                self.paused_at = Some(Utc::now());
            }
            _ if to.is_terminal() => {
                self.completed_at = Some(Utc::now());
                self.progress_stage = None;
                self.estimated_time_left = None;
            }
            _ => {}
        }

        Ok(())
    }

    /// Record progress for the current stage.
    ///
    /// Progress is clamped to be monotonically non-decreasing while the job
    /// is in flight, and the ETA is refreshed from the estimated total when
    /// one is known. Advancing progress also clears any stall mark.
    pub fn set_progress(&mut self, percent: u8, stage: Stage) {
        self.progress_percent = self.progress_percent.max(percent.min(100));
        self.progress_stage = Some(stage);
        self.stalled_at = None;
        self.estimated_time_left = self.estimated_total_seconds.map(|total| {
            let remaining = total * i64::from(100 - self.progress_percent) / 100;
            remaining.max(0)
        });
    }

    /// Deadline after which the stall detector flags this job, derived from
    /// the estimated duration plus a grace period.
    pub fn stall_deadline(&self, grace_seconds: i64, floor_seconds: i64) -> DateTime<Utc> {
        let budget = self
            .estimated_total_seconds
            .unwrap_or(0)
            .max(floor_seconds)
            + grace_seconds;
        self.updated_at + chrono::Duration::seconds(budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_inputs() -> JobInputs {
        JobInputs {
            file_path: "/tmp/meeting.wav".to_string(),
            requested_model: Some("medium".to_string()),
            requested_diarizer: None,
            has_timestamps: true,
            has_speaker_labels: false,
        }
    }

    #[test]
    fn test_new_job_is_queued_with_zero_progress() {
        let job = Job::new(test_inputs(), Some(120));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress_percent, 0);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = Job::new(test_inputs(), None);
        assert!(job.transition(JobStatus::Processing).is_ok());
        assert!(job.started_at.is_some());
        assert!(job.transition(JobStatus::Completed).is_ok());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_illegal_transition_leaves_record_unchanged() {
        let mut job = Job::new(test_inputs(), None);
        job.transition(JobStatus::Processing).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        let before = job.clone();

        let err = job.transition(JobStatus::Processing).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        assert_eq!(job.status, before.status);
        assert_eq!(job.completed_at, before.completed_at);
    }

    #[test]
    fn test_terminal_state_clears_stage_and_eta() {
        let mut job = Job::new(test_inputs(), Some(60));
        job.transition(JobStatus::Processing).unwrap();
        job.set_progress(30, Stage::Transcribing);
        assert!(job.progress_stage.is_some());
        assert!(job.estimated_time_left.is_some());

        job.transition(JobStatus::Failed).unwrap();
        assert!(job.progress_stage.is_none());
        assert!(job.estimated_time_left.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_started_at_set_only_once() {
        let mut job = Job::new(test_inputs(), None);
        job.transition(JobStatus::Processing).unwrap();
        let first = job.started_at;

        // pause, resume, re-enter processing
        job.transition(JobStatus::Pausing).unwrap();
        job.transition(JobStatus::Paused).unwrap();
        job.transition(JobStatus::Queued).unwrap();
        job.transition(JobStatus::Processing).unwrap();
        assert_eq!(job.started_at, first);
    }

    #[test]
    fn test_progress_is_monotonic_while_processing() {
        let mut job = Job::new(test_inputs(), None);
        job.transition(JobStatus::Processing).unwrap();
        job.set_progress(30, Stage::Transcribing);
        job.set_progress(10, Stage::LoadingModel);
        assert_eq!(job.progress_percent, 30);
    }

    #[test]
    fn test_progress_frozen_across_pause_resume() {
        let mut job = Job::new(test_inputs(), None);
        job.transition(JobStatus::Processing).unwrap();
        job.set_progress(30, Stage::Transcribing);
        job.transition(JobStatus::Pausing).unwrap();
        job.transition(JobStatus::Paused).unwrap();
        job.transition(JobStatus::Queued).unwrap();
        assert_eq!(job.progress_percent, 30);
    }

    #[test]
    fn test_cancel_edges() {
        // queued cancels directly
        let mut queued = Job::new(test_inputs(), None);
        assert!(queued.transition(JobStatus::Cancelled).is_ok());

        // processing drains through cancelling
        let mut processing = Job::new(test_inputs(), None);
        processing.transition(JobStatus::Processing).unwrap();
        assert!(processing.transition(JobStatus::Cancelling).is_ok());
        assert!(processing.transition(JobStatus::Cancelled).is_ok());
    }

    #[test]
    fn test_eta_tracks_progress() {
        let mut job = Job::new(test_inputs(), Some(100));
        job.transition(JobStatus::Processing).unwrap();
        job.set_progress(30, Stage::Transcribing);
        assert_eq!(job.estimated_time_left, Some(70));
        job.set_progress(90, Stage::Finalizing);
        assert_eq!(job.estimated_time_left, Some(10));
    }
}
