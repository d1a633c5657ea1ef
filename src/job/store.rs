//! # Job Record Store
//!
//! The engine's boundary with persistence: read-modify-write access to job
//! records, one commit per stage transition. The production deployment backs
//! this with the relational store owned by the web layer; the engine only
//! depends on the trait.
//!
//! ## Thread Safety:
//! The in-memory implementation uses RwLock so status polls (reads) never
//! block each other and writers serialize per the normal lock semantics.

use crate::error::{EngineError, EngineResult};
use crate::job::{Job, JobStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persistence seam consumed by the queue, runner and control surface.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fetch one record; `NotFound` if the ID is unknown.
    async fn get_job(&self, id: Uuid) -> EngineResult<Job>;

    /// Write a record back. Implementations bump `updated_at` so the stall
    /// detector sees every save as progress.
    async fn save_job(&self, job: Job) -> EngineResult<()>;

    /// Count records in a given status (queue depth / limit checks).
    async fn count_jobs(&self, status: JobStatus) -> EngineResult<usize>;

    /// List records in a given status (stall detector scan).
    async fn list_jobs(&self, status: JobStatus) -> EngineResult<Vec<Job>>;
}

/// HashMap-backed store used by tests and single-process deployments.
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record verbatim, without touching `updated_at`. Lets tests
    /// seed stale records for the stall detector.
    #[cfg(test)]
    pub(crate) async fn insert_raw(&self, job: Job) {
        self.jobs.write().await.insert(job.id, job);
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get_job(&self, id: Uuid) -> EngineResult<Job> {
        let jobs = self.jobs.read().await;
        jobs.get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("job {} does not exist", id)))
    }

    async fn save_job(&self, mut job: Job) -> EngineResult<()> {
        job.updated_at = Utc::now();
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn count_jobs(&self, status: JobStatus) -> EngineResult<usize> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().filter(|j| j.status == status).count())
    }

    async fn list_jobs(&self, status: JobStatus) -> EngineResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect())
    }
}
