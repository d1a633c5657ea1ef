//! # Transcription Backend Interface
//!
//! The opaque speech-to-text capability the engine drives: load a model,
//! transcribe a file, optionally diarize it. Model internals live behind
//! this trait; the engine never sees weights, devices or decoders.
//!
//! Backends return segments as loosely-typed JSON (upstream engines differ
//! in what they emit per segment), so this module also owns the
//! normalization that turns them into the stable [`Segment`] shape written
//! to the artifact sidecar.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Errors surfaced by a transcription backend.
#[derive(Debug)]
pub enum BackendError {
    /// The backing model artifact is not installed/downloadable
    ModelNotFound(String),

    /// The transcription run itself failed
    TranscriptionFailed(String),

    /// The diarization run failed (optional feature; jobs degrade, not fail)
    DiarizationFailed(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::ModelNotFound(msg) => write!(f, "model not found: {}", msg),
            BackendError::TranscriptionFailed(msg) => write!(f, "transcription failed: {}", msg),
            BackendError::DiarizationFailed(msg) => write!(f, "diarization failed: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// Handle to a loaded model.
///
/// The `inner` payload is backend-defined; the engine only keys on
/// `model_id` and hands the whole handle back on each transcribe call.
#[derive(Clone)]
pub struct ModelHandle {
    pub model_id: String,
    pub inner: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_id", &self.model_id)
            .finish()
    }
}

/// Per-job options forwarded to the backend.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    /// Preferred language hint (ISO 639-1), None = autodetect
    pub language: Option<String>,

    /// Whether segment timestamps are wanted
    pub with_timestamps: bool,
}

/// What the backend hands back for one file.
#[derive(Debug, Clone)]
pub struct RawTranscript {
    pub text: String,

    /// Loosely-typed segment records, normalized by [`normalize_segments`]
    pub segments: Vec<Value>,

    /// Detected language (ISO 639-1)
    pub language: String,

    /// Audio duration in seconds
    pub duration: f64,
}

/// Result of a diarization pass.
#[derive(Debug, Clone)]
pub struct DiarizationOutput {
    pub speaker_count: u32,
}

/// The opaque transcription capability consumed by the stage runner.
///
/// Implementations own all heavy lifting; long CPU/IO-bound work must not
/// block the async runtime (real backends wrap their inference in
/// `spawn_blocking` internally).
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Load (or locate) the model with the given identifier.
    async fn load_model(&self, model_id: &str) -> Result<ModelHandle, BackendError>;

    /// Transcribe one file with an already-loaded model.
    async fn transcribe(
        &self,
        model: &ModelHandle,
        audio_path: &Path,
        options: &TranscribeOptions,
    ) -> Result<RawTranscript, BackendError>;

    /// Run speaker diarization on a file with the given diarizer backend.
    async fn diarize(
        &self,
        diarizer_id: &str,
        audio_path: &Path,
    ) -> Result<DiarizationOutput, BackendError>;
}

/// Backend wired into the binary until a real speech-to-text runtime lands.
///
/// Accepts any model identifier, checks that the audio file exists, and
/// emits a placeholder transcript so the whole job pipeline (queue, stages,
/// pause/cancel, artifacts) can be exercised end to end.
// TODO: replace with a whisper.cpp-backed implementation of the trait.
pub struct PlaceholderBackend;

#[async_trait]
impl TranscriptionBackend for PlaceholderBackend {
    async fn load_model(&self, model_id: &str) -> Result<ModelHandle, BackendError> {
        Ok(ModelHandle {
            model_id: model_id.to_string(),
            inner: Arc::new(()),
        })
    }

    async fn transcribe(
        &self,
        model: &ModelHandle,
        audio_path: &Path,
        _options: &TranscribeOptions,
    ) -> Result<RawTranscript, BackendError> {
        let metadata = tokio::fs::metadata(audio_path).await.map_err(|e| {
            BackendError::TranscriptionFailed(format!(
                "cannot read {}: {}",
                audio_path.display(),
                e
            ))
        })?;

        let text = format!(
            "[placeholder transcript of {} ({} bytes) via {}]",
            audio_path.display(),
            metadata.len(),
            model.model_id
        );
        let segments = vec![serde_json::json!({"start": 0.0, "end": 0.0, "text": &text})];
        Ok(RawTranscript {
            text,
            segments,
            language: "en".to_string(),
            duration: 0.0,
        })
    }

    async fn diarize(
        &self,
        diarizer_id: &str,
        _audio_path: &Path,
    ) -> Result<DiarizationOutput, BackendError> {
        Err(BackendError::DiarizationFailed(format!(
            "no diarization runtime is wired in (requested {})",
            diarizer_id
        )))
    }
}

/// Normalized transcript segment as written to the artifact sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Normalize loosely-typed backend segments into the stable sidecar shape.
///
/// ## Coercion rules:
/// - Non-numeric or missing `start`/`end` become 0.0
/// - Missing text becomes the empty string; present text is trimmed
/// - Entries that are not structurally an object at all are dropped
/// - IDs are reassigned sequentially over the surviving entries
pub fn normalize_segments(raw: &[Value]) -> Vec<Segment> {
    raw.iter()
        .filter_map(|entry| entry.as_object())
        .enumerate()
        .map(|(id, obj)| Segment {
            id,
            start: obj.get("start").and_then(Value::as_f64).unwrap_or(0.0),
            end: obj.get("end").and_then(Value::as_f64).unwrap_or(0.0),
            text: obj
                .get("text")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or("")
                .to_string(),
        })
        .collect()
}
