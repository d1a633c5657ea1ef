//! # Stall Detector
//!
//! Background task that periodically scans processing jobs and marks the
//! ones whose record has not been touched within an estimated-duration
//! derived timeout. Stalled is an observability signal only: the detector
//! never force-terminates a job or changes its status.

use crate::job::store::JobStore;
use crate::job::JobStatus;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Minimum stall budget so short jobs without an estimate are not flagged
/// the moment they start.
const STALL_FLOOR_SECONDS: i64 = 60;

/// Configuration for one detector instance.
#[derive(Debug, Clone)]
pub struct StallDetectorConfig {
    /// How often to scan processing jobs
    pub poll_interval: Duration,

    /// Slack added on top of a job's estimated duration
    pub grace_seconds: i64,
}

/// Spawn the detector loop. The returned handle can be aborted at shutdown.
pub fn spawn(store: Arc<dyn JobStore>, config: StallDetectorConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(err) = scan_once(store.as_ref(), &config).await {
                tracing::warn!("Stall scan failed: {}", err);
            }
        }
    })
}

/// One scan pass, factored out so tests can drive it directly.
pub async fn scan_once(
    store: &dyn JobStore,
    config: &StallDetectorConfig,
) -> crate::error::EngineResult<()> {
    let now = Utc::now();
    for mut job in store.list_jobs(JobStatus::Processing).await? {
        if job.stalled_at.is_some() {
            continue;
        }
        let deadline = job.stall_deadline(config.grace_seconds, STALL_FLOOR_SECONDS);
        if now > deadline {
            tracing::warn!(
                "Job {} looks stalled (no progress since {})",
                job.id,
                job.updated_at
            );
            job.stalled_at = Some(now);
            store.save_job(job).await?;
        }
    }
    Ok(())
}
