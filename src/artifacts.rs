//! # Transcript Artifacts
//!
//! Persists the outputs of a completed job: a plain-text transcript plus a
//! JSON sidecar carrying the normalized segments and run metadata. Paths
//! derive deterministically from the job ID so downstream export tooling
//! can address artifacts without a lookup.
//!
//! Layout (stable contract with the storage layer):
//! - `<dir>/<job_id>.txt`: transcript text
//! - `<dir>/<job_id>.json`: sidecar metadata

use crate::error::EngineResult;
use crate::transcription::backend::Segment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Sidecar metadata written next to the transcript text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSidecar {
    pub job_id: Uuid,
    pub language: String,
    pub duration: f64,
    pub model_used: String,
    pub diarizer_used: Option<String>,
    pub speaker_count: Option<u32>,
    /// Resolver substitution notes, kept for operator visibility
    pub notes: Vec<String>,
    pub segments: Vec<Segment>,
}

/// Path of the transcript text file for a job.
pub fn transcript_path(dir: &Path, job_id: Uuid) -> PathBuf {
    dir.join(format!("{}.txt", job_id))
}

/// Path of the JSON sidecar for a job.
pub fn sidecar_path(dir: &Path, job_id: Uuid) -> PathBuf {
    dir.join(format!("{}.json", job_id))
}

/// Write both artifacts for a job, creating the directory on first use.
/// Returns the transcript path recorded on the job record.
pub async fn write_transcript(
    dir: &Path,
    text: &str,
    sidecar: &TranscriptSidecar,
) -> EngineResult<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let text_path = transcript_path(dir, sidecar.job_id);
    tokio::fs::write(&text_path, text).await?;

    let json = serde_json::to_vec_pretty(sidecar)?;
    tokio::fs::write(sidecar_path(dir, sidecar.job_id), json).await?;

    Ok(text_path)
}
