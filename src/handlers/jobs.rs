//! # Job REST API Handlers
//!
//! HTTP endpoints over the job engine: submission, status lookup, the
//! pause/cancel/resume/restart controls and queue tuning. Handlers stay
//! thin: all lifecycle rules live in the engine, and illegal requests
//! surface as structured errors via [`crate::error::EngineError`].
//!
//! ## Available Endpoints:
//! - `POST /jobs` - Submit a file for transcription
//! - `GET /jobs/{id}` - Current status and progress of one job
//! - `POST /jobs/{id}/cancel` - Request cancellation
//! - `POST /jobs/{id}/pause` - Request a pause
//! - `POST /jobs/{id}/resume` - Resume a paused job
//! - `POST /jobs/{id}/restart` - Retry a finished job as a new record
//! - `PUT /queue/concurrency` - Resize the worker pool

use crate::engine::SubmitRequest;
use crate::error::EngineError;
use crate::job::Job;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Request body for resizing the worker pool.
#[derive(Debug, Deserialize)]
pub struct ConcurrencyRequest {
    pub concurrency: usize,
}

/// Flattened view of a job record returned by every job endpoint.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub status: String,
    pub progress_percent: u8,
    pub progress_stage: Option<String>,
    pub estimated_time_left: Option<i64>,
    pub processing_seconds: i64,
    pub resume_count: u32,
    pub stalled: bool,
    pub error_message: Option<String>,
    pub file_path: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub transcript_path: Option<String>,
    pub language_detected: Option<String>,
    pub duration: Option<f64>,
    pub speaker_count: Option<u32>,
    pub model_used: Option<String>,
    pub diarizer_used: Option<String>,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status.to_string(),
            progress_percent: job.progress_percent,
            progress_stage: job.progress_stage.map(|s| s.as_str().to_string()),
            estimated_time_left: job.estimated_time_left,
            processing_seconds: job.processing_seconds,
            resume_count: job.resume_count,
            stalled: job.stalled_at.is_some(),
            error_message: job.error_message.clone(),
            file_path: job.inputs.file_path.clone(),
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
            transcript_path: job.transcript_path.clone(),
            language_detected: job.language_detected.clone(),
            duration: job.duration,
            speaker_count: job.speaker_count,
            model_used: job.model_used.clone(),
            diarizer_used: job.diarizer_used.clone(),
        }
    }
}

/// Submit a file for transcription.
///
/// ## Endpoint: `POST /jobs`
///
/// ## Request Body:
/// ```json
/// {
///   "file_path": "/data/uploads/meeting.wav",
///   "requested_model": "medium",
///   "has_timestamps": true,
///   "has_speaker_labels": false
/// }
/// ```
pub async fn submit_job(
    state: web::Data<AppState>,
    request: web::Json<SubmitRequest>,
) -> Result<HttpResponse, EngineError> {
    if request.file_path.trim().is_empty() {
        return Err(EngineError::InvalidArgument(
            "file_path must not be empty".to_string(),
        ));
    }

    let job = state.engine.submit(request.into_inner()).await?;
    Ok(HttpResponse::Created().json(JobResponse::from(&job)))
}

/// Current status and progress of one job.
///
/// ## Endpoint: `GET /jobs/{id}`
pub async fn get_job(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, EngineError> {
    let job = state.engine.get_job(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(JobResponse::from(&job)))
}

/// Request cancellation of a job.
///
/// ## Endpoint: `POST /jobs/{id}/cancel`
///
/// Queued and paused jobs cancel immediately; running jobs drain through
/// `cancelling` and finalize at the runner's next checkpoint.
pub async fn cancel_job(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, EngineError> {
    let job = state.engine.cancel(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(JobResponse::from(&job)))
}

/// Request a pause.
///
/// ## Endpoint: `POST /jobs/{id}/pause`
///
/// Rejected with 409 while the job is in its diarizing sub-stage or in any
/// state the lifecycle does not allow to pause.
pub async fn pause_job(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, EngineError> {
    let job = state.engine.pause(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(JobResponse::from(&job)))
}

/// Resume a paused job.
///
/// ## Endpoint: `POST /jobs/{id}/resume`
pub async fn resume_job(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, EngineError> {
    let job = state.engine.resume(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(JobResponse::from(&job)))
}

/// Retry a finished job. Returns the fresh record; the original keeps its
/// terminal state and history.
///
/// ## Endpoint: `POST /jobs/{id}/restart`
pub async fn restart_job(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, EngineError> {
    let job = state.engine.restart(path.into_inner()).await?;
    Ok(HttpResponse::Created().json(JobResponse::from(&job)))
}

/// Resize the worker pool at runtime.
///
/// ## Endpoint: `PUT /queue/concurrency`
///
/// ## Request Body:
/// ```json
/// {"concurrency": 5}
/// ```
pub async fn set_concurrency(
    state: web::Data<AppState>,
    request: web::Json<ConcurrencyRequest>,
) -> Result<HttpResponse, EngineError> {
    state.engine.set_concurrency(request.concurrency).await?;
    let stats = state.engine.queue_stats().await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "concurrency": stats.concurrency,
        "workers": stats.workers,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
