//! # Transcription Subsystem
//!
//! The engine's view of speech-to-text: an opaque backend capability
//! (model loading + transcription + optional diarization), a process-wide
//! cache of loaded models, and the capability resolver that picks concrete
//! backends from preferences plus a live availability snapshot.

pub mod backend;
pub mod cache;
pub mod capability;

pub use backend::PlaceholderBackend;
pub use capability::{BackendAvailability, CapabilitySnapshot, StaticAvailability};
