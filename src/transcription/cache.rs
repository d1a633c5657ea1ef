//! # Model Cache
//!
//! Process-wide cache of loaded transcription models, keyed by model
//! identifier. Concurrent requests for the *same* uncached model serialize
//! behind a per-model lock so the expensive load happens exactly once;
//! requests for *different* models do not convoy behind one another.
//!
//! The cache is injected into the stage runner rather than living in a
//! global, so tests can use a fresh one per scenario.

use crate::error::{EngineError, EngineResult};
use crate::transcription::backend::{BackendError, ModelHandle, TranscriptionBackend};
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Keyed cache of loaded model handles.
pub struct ModelCache {
    /// Outer lock guards only the map of per-model slots and is never held
    /// across an await; each slot's own mutex serializes loads for that key.
    slots: StdMutex<HashMap<String, Arc<Mutex<Option<ModelHandle>>>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self {
            slots: StdMutex::new(HashMap::new()),
        }
    }

    /// Return the cached handle for `model_id`, loading it through the
    /// backend on first use.
    ///
    /// A failed load is fatal only for the requesting job: the slot stays
    /// empty and the next acquire retries, so one missing model never
    /// poisons the cache for other jobs.
    pub async fn acquire(
        &self,
        model_id: &str,
        backend: &dyn TranscriptionBackend,
    ) -> EngineResult<ModelHandle> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| EngineError::Internal("model cache lock poisoned".to_string()))?;
            slots
                .entry(model_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .clone()
        };

        let mut guard = slot.lock().await;
        if let Some(handle) = guard.as_ref() {
            tracing::debug!("Model '{}' served from cache", model_id);
            return Ok(handle.clone());
        }

        tracing::info!("Loading model '{}' (not cached)", model_id);
        match backend.load_model(model_id).await {
            Ok(handle) => {
                *guard = Some(handle.clone());
                tracing::info!("Model '{}' loaded and cached", model_id);
                Ok(handle)
            }
            Err(BackendError::ModelNotFound(msg)) => Err(EngineError::ModelNotFound(msg)),
            Err(other) => Err(EngineError::Internal(format!(
                "model load for '{}' failed: {}",
                model_id, other
            ))),
        }
    }

    /// Number of models currently cached (health reporting).
    pub fn loaded_count(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| {
                slots
                    .values()
                    .filter(|slot| slot.try_lock().map(|g| g.is_some()).unwrap_or(true))
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::backend::{DiarizationOutput, RawTranscript, TranscribeOptions};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that counts loads and can simulate a missing model.
    struct CountingBackend {
        loads: AtomicUsize,
        missing: Option<String>,
    }

    impl CountingBackend {
        fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
                missing: None,
            }
        }

        fn with_missing(model_id: &str) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                missing: Some(model_id.to_string()),
            }
        }
    }

    #[async_trait]
    impl TranscriptionBackend for CountingBackend {
        async fn load_model(&self, model_id: &str) -> Result<ModelHandle, BackendError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.missing.as_deref() == Some(model_id) {
                return Err(BackendError::ModelNotFound(model_id.to_string()));
            }
            // Small delay widens the window for duplicate-load races.
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
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
            unreachable!("cache tests never transcribe")
        }

        async fn diarize(
            &self,
            _diarizer_id: &str,
            _audio_path: &Path,
        ) -> Result<DiarizationOutput, BackendError> {
            unreachable!("cache tests never diarize")
        }
    }

    #[tokio::test]
    async fn test_same_model_loaded_exactly_once() {
        let cache = Arc::new(ModelCache::new());
        let backend = Arc::new(CountingBackend::new());

        let c1 = cache.clone();
        let b1 = backend.clone();
        let c2 = cache.clone();
        let b2 = backend.clone();
        let (r1, r2) = tokio::join!(
            async move { c1.acquire("medium", b1.as_ref()).await },
            async move { c2.acquire("medium", b2.as_ref()).await },
        );

        assert!(r1.is_ok());
        assert!(r2.is_ok());
        assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_models_each_load() {
        let cache = ModelCache::new();
        let backend = CountingBackend::new();

        cache.acquire("small", &backend).await.unwrap();
        cache.acquire("large", &backend).await.unwrap();
        assert_eq!(backend.loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.loaded_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_model_does_not_poison_cache() {
        let cache = ModelCache::new();
        let backend = CountingBackend::with_missing("ghost");

        let err = cache.acquire("ghost", &backend).await.unwrap_err();
        assert!(matches!(err, EngineError::ModelNotFound(_)));

        // Other models still load fine, and the failed slot retries.
        cache.acquire("medium", &backend).await.unwrap();
        let err2 = cache.acquire("ghost", &backend).await.unwrap_err();
        assert!(matches!(err2, EngineError::ModelNotFound(_)));
        assert_eq!(backend.loads.load(Ordering::SeqCst), 3);
    }
}
