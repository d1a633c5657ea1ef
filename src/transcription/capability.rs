//! # Capability Resolver
//!
//! Turns a job's requested model/diarizer plus admin defaults into a
//! concrete, currently-available selection, with multi-level fallback and
//! human-readable notes for observability.
//!
//! ## Selection order:
//! 1. The job's own request
//! 2. The admin default (diarizer only when diarization is admin-enabled)
//! 3. A fixed priority fallback list
//!
//! The first candidate whose availability snapshot entry reports
//! `available = true` wins. No candidate available is not an error for
//! optional features: diarization is disabled gracefully and the job still
//! completes. Transcription itself is not optional, so the runner fails the
//! job when no ASR model resolves.
//!
//! The resolver performs no I/O; availability facts arrive as a read-only
//! snapshot supplied by an external collaborator.

use serde::{Deserialize, Serialize};

/// Availability facts for one backend, as supplied by the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendAvailability {
    pub key: String,
    pub available: bool,
    /// Free-form operator notes (GPU presence, VRAM thresholds, ...)
    pub notes: Vec<String>,
}

impl BackendAvailability {
    pub fn available(key: &str) -> Self {
        Self {
            key: key.to_string(),
            available: true,
            notes: Vec::new(),
        }
    }

    pub fn unavailable(key: &str) -> Self {
        Self {
            key: key.to_string(),
            available: false,
            notes: Vec::new(),
        }
    }
}

/// Read-only fact table of which backends are currently usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub asr: Vec<BackendAvailability>,
    pub diarizers: Vec<BackendAvailability>,
}

impl CapabilitySnapshot {
    fn asr_available(&self, key: &str) -> bool {
        self.asr.iter().any(|b| b.key == key && b.available)
    }

    fn diarizer_available(&self, key: &str) -> bool {
        self.diarizers.iter().any(|b| b.key == key && b.available)
    }
}

/// Supplier of availability snapshots.
pub trait AvailabilityProvider: Send + Sync {
    fn snapshot(&self) -> CapabilitySnapshot;
}

/// Fixed snapshot provider, seeded at startup (or by a test).
pub struct StaticAvailability {
    snapshot: CapabilitySnapshot,
}

impl StaticAvailability {
    pub fn new(snapshot: CapabilitySnapshot) -> Self {
        Self { snapshot }
    }
}

impl AvailabilityProvider for StaticAvailability {
    fn snapshot(&self) -> CapabilitySnapshot {
        self.snapshot.clone()
    }
}

/// Where a selected candidate came from, surfaced in fallback notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateSource {
    Job,
    Admin,
    Fallback,
}

impl CandidateSource {
    fn describe(&self) -> &'static str {
        match self {
            CandidateSource::Job => "job request",
            CandidateSource::Admin => "admin default",
            CandidateSource::Fallback => "fallback",
        }
    }
}

/// Outcome of resolving one capability.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Concrete backend key, or None when the feature is disabled
    pub selection: Option<String>,

    /// Human-readable notes about substitutions or disablement
    pub notes: Vec<String>,
}

/// ASR fallback priority when neither the job nor the admin default resolves.
const ASR_FALLBACKS: &[&str] = &["large-v3", "medium", "base"];

/// Diarizer fallback priority: heavy backends first, lightweight last.
const DIARIZER_FALLBACKS: &[&str] = &["pyannote", "sortformer", "heuristic"];

/// Picks concrete backends from preferences + availability.
pub struct CapabilityResolver {
    admin_default_asr: String,
    admin_default_diarizer: String,
    diarization_enabled: bool,
}

impl CapabilityResolver {
    pub fn new(
        admin_default_asr: String,
        admin_default_diarizer: String,
        diarization_enabled: bool,
    ) -> Self {
        Self {
            admin_default_asr,
            admin_default_diarizer,
            diarization_enabled,
        }
    }

    /// Resolve the ASR model for a job.
    ///
    /// `selection = None` means no ASR backend is available at all; the
    /// caller treats that as fatal for the job.
    pub fn resolve_asr(&self, requested: Option<&str>, snapshot: &CapabilitySnapshot) -> Resolution {
        let candidates = build_candidates(
            requested,
            Some(self.admin_default_asr.as_str()),
            ASR_FALLBACKS,
        );
        resolve(
            "ASR model",
            requested,
            &candidates,
            |key| snapshot.asr_available(key),
        )
    }

    /// Resolve the diarization backend for a job.
    ///
    /// `selection = None` disables diarization for this job; the pipeline
    /// continues without speaker labels.
    pub fn resolve_diarizer(
        &self,
        requested: Option<&str>,
        snapshot: &CapabilitySnapshot,
    ) -> Resolution {
        if !self.diarization_enabled {
            return Resolution {
                selection: None,
                notes: vec!["diarization is disabled by the administrator".to_string()],
            };
        }

        let candidates = build_candidates(
            requested,
            Some(self.admin_default_diarizer.as_str()),
            DIARIZER_FALLBACKS,
        );
        resolve(
            "diarizer",
            requested,
            &candidates,
            |key| snapshot.diarizer_available(key),
        )
    }
}

/// Deduplicated ordered candidate list: job request, admin default, fallbacks.
fn build_candidates(
    requested: Option<&str>,
    admin_default: Option<&str>,
    fallbacks: &[&str],
) -> Vec<(CandidateSource, String)> {
    let mut candidates: Vec<(CandidateSource, String)> = Vec::new();

    let mut push = |source: CandidateSource, key: &str| {
        if !candidates.iter().any(|(_, k)| k == key) {
            candidates.push((source, key.to_string()));
        }
    };

    if let Some(key) = requested {
        push(CandidateSource::Job, key);
    }
    if let Some(key) = admin_default {
        push(CandidateSource::Admin, key);
    }
    for key in fallbacks {
        push(CandidateSource::Fallback, key);
    }

    candidates
}

fn resolve(
    capability: &str,
    requested: Option<&str>,
    candidates: &[(CandidateSource, String)],
    is_available: impl Fn(&str) -> bool,
) -> Resolution {
    for (source, key) in candidates {
        if !is_available(key) {
            continue;
        }

        let mut notes = Vec::new();
        if let Some(wanted) = requested {
            if wanted != key {
                notes.push(format!(
                    "requested {} '{}' is unavailable; using '{}' ({})",
                    capability,
                    wanted,
                    key,
                    source.describe()
                ));
            }
        } else if *source == CandidateSource::Fallback {
            notes.push(format!(
                "no {} requested; using '{}' ({})",
                capability,
                key,
                source.describe()
            ));
        }

        return Resolution {
            selection: Some(key.clone()),
            notes,
        };
    }

    Resolution {
        selection: None,
        notes: vec![format!("no {} backend is available", capability)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> CapabilityResolver {
        CapabilityResolver::new("medium".to_string(), "pyannote".to_string(), true)
    }

    #[test]
    fn test_requested_diarizer_wins_when_available() {
        let snapshot = CapabilitySnapshot {
            asr: vec![],
            diarizers: vec![
                BackendAvailability::available("sortformer"),
                BackendAvailability::available("pyannote"),
            ],
        };

        let resolution = resolver().resolve_diarizer(Some("sortformer"), &snapshot);
        assert_eq!(resolution.selection.as_deref(), Some("sortformer"));
        assert!(resolution.notes.is_empty());
    }

    #[test]
    fn test_unavailable_request_falls_back_to_admin_default_with_note() {
        let snapshot = CapabilitySnapshot {
            asr: vec![],
            diarizers: vec![
                BackendAvailability::unavailable("sortformer"),
                BackendAvailability::available("pyannote"),
            ],
        };

        let resolution = resolver().resolve_diarizer(Some("sortformer"), &snapshot);
        assert_eq!(resolution.selection.as_deref(), Some("pyannote"));
        assert_eq!(resolution.notes.len(), 1);
        assert!(resolution.notes[0].contains("sortformer"));
        assert!(resolution.notes[0].contains("admin default"));
    }

    #[test]
    fn test_no_diarizer_available_disables_feature() {
        let snapshot = CapabilitySnapshot::default();
        let resolution = resolver().resolve_diarizer(Some("pyannote"), &snapshot);
        assert!(resolution.selection.is_none());
        assert!(resolution.notes[0].contains("no diarizer backend is available"));
    }

    #[test]
    fn test_admin_disabled_diarization_skips_candidates() {
        let resolver = CapabilityResolver::new("medium".to_string(), "pyannote".to_string(), false);
        let snapshot = CapabilitySnapshot {
            asr: vec![],
            diarizers: vec![BackendAvailability::available("pyannote")],
        };

        let resolution = resolver.resolve_diarizer(Some("pyannote"), &snapshot);
        assert!(resolution.selection.is_none());
        assert!(resolution.notes[0].contains("disabled by the administrator"));
    }

    #[test]
    fn test_asr_falls_through_priority_list() {
        let snapshot = CapabilitySnapshot {
            asr: vec![
                BackendAvailability::unavailable("medium"),
                BackendAvailability::available("base"),
            ],
            diarizers: vec![],
        };

        // No request, admin default unavailable, so the fallback list lands
        // on "base".
        let resolution = resolver().resolve_asr(None, &snapshot);
        assert_eq!(resolution.selection.as_deref(), Some("base"));
        assert_eq!(resolution.notes.len(), 1);
        assert!(resolution.notes[0].contains("fallback"));
    }

    #[test]
    fn test_candidate_list_is_deduplicated_in_order() {
        let candidates = build_candidates(Some("pyannote"), Some("pyannote"), DIARIZER_FALLBACKS);
        let keys: Vec<&str> = candidates.iter().map(|(_, k)| k.as_str()).collect();
        assert_eq!(keys, vec!["pyannote", "sortformer", "heuristic"]);
        assert_eq!(candidates[0].0, CandidateSource::Job);
    }
}
