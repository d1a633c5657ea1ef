//! # Job Queue
//!
//! Bounded-concurrency dispatcher: accepts job IDs, holds them until a
//! worker slot is free, and invokes the executor exactly once per accepted
//! ID. Supports live concurrency resizing and graceful shutdown.
//!
//! ## Dispatch guarantees:
//! - FIFO among pending IDs; no completion-order guarantee across workers
//! - Exactly-once dispatch, enforced by a pending set checked at enqueue
//!   time and a running set re-checked at worker pickup
//! - One worker failure never kills the pool: execution errors are logged
//!   and swallowed at the worker boundary
//!
//! ## Shutdown:
//! `stop()` flips a per-generation shutdown signal and joins the workers.
//! Each worker checks the signal with priority before pulling its next job
//! ID, so a draining worker finishes its current job and exits without
//! dispatching anything new. The channel itself outlives the workers, so
//! job IDs still queued when the pool drains (or resizes) are dispatched by
//! the next generation of workers instead of being lost.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Seam between the queue and the stage runner. The queue knows nothing
/// about transcription; it dispatches IDs to whatever executor it was built
/// with (tests use a counting stub).
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Drive one job to a terminal or parked state. The executor opens its
    /// own fresh view of the record, so each dispatch is isolated.
    async fn execute(&self, job_id: Uuid) -> anyhow::Result<()>;
}

/// Worker-pool state guarded by the queue's async mutex.
struct PoolState {
    started: bool,
    concurrency: usize,
    tx: mpsc::UnboundedSender<Uuid>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Uuid>>>,
    /// Per-generation drain signal; replaced on every `start`
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Bounded worker pool over an executor.
pub struct JobQueue {
    executor: Arc<dyn JobExecutor>,
    pool: Mutex<PoolState>,
    pending: Arc<StdMutex<HashSet<Uuid>>>,
    running: Arc<StdMutex<HashSet<Uuid>>>,
}

impl JobQueue {
    pub fn new(executor: Arc<dyn JobExecutor>, concurrency: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            executor,
            pool: Mutex::new(PoolState {
                started: false,
                concurrency: concurrency.max(1),
                tx,
                rx: Arc::new(Mutex::new(rx)),
                shutdown_tx,
                handles: Vec::new(),
            }),
            pending: Arc::new(StdMutex::new(HashSet::new())),
            running: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Spin up the worker loops. Idempotent: a started queue is left alone.
    pub async fn start(&self) {
        let mut pool = self.pool.lock().await;
        if pool.started {
            return;
        }

        tracing::info!("Starting job queue with {} workers", pool.concurrency);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let rx = pool.rx.clone();
        for worker_id in 0..pool.concurrency {
            pool.handles.push(spawn_worker(
                worker_id,
                rx.clone(),
                shutdown_rx.clone(),
                self.pending.clone(),
                self.running.clone(),
                self.executor.clone(),
            ));
        }
        pool.shutdown_tx = shutdown_tx;
        pool.started = true;
    }

    /// Accept a job ID for later dispatch.
    ///
    /// Starts the queue on first use (lazy bootstrap). IDs already running
    /// or already pending are not re-queued; the call still succeeds, since
    /// the job is on its way either way.
    pub async fn enqueue(&self, job_id: Uuid) -> EngineResult<()> {
        self.start().await;

        {
            let running = lock_set(&self.running)?;
            if running.contains(&job_id) {
                tracing::debug!("Job {} already running, not re-queued", job_id);
                return Ok(());
            }
        }
        {
            let mut pending = lock_set(&self.pending)?;
            if !pending.insert(job_id) {
                tracing::debug!("Job {} already pending, not re-queued", job_id);
                return Ok(());
            }
        }

        let pool = self.pool.lock().await;
        if pool.tx.send(job_id).is_err() {
            lock_set(&self.pending)?.remove(&job_id);
            return Err(EngineError::Internal(
                "job queue channel is closed".to_string(),
            ));
        }
        tracing::debug!("Job {} enqueued", job_id);
        Ok(())
    }

    /// Drain the workers and join them.
    ///
    /// Workers finish their current job but dispatch nothing new; IDs still
    /// on the channel stay there for the next generation. Always leaves the
    /// pool in a consistent "not started" state, even if a worker panicked:
    /// failed joins are logged and discarded.
    pub async fn stop(&self) {
        let mut pool = self.pool.lock().await;
        if !pool.started {
            return;
        }

        tracing::info!("Stopping job queue ({} workers)", pool.handles.len());
        if pool.shutdown_tx.send(true).is_err() {
            tracing::warn!("All queue workers already gone while stopping");
        }

        let handles = std::mem::take(&mut pool.handles);
        for result in join_all(handles).await {
            if let Err(err) = result {
                tracing::error!("Worker task ended abnormally: {}", err);
            }
        }
        pool.started = false;
    }

    /// Resize the worker pool.
    ///
    /// Drains the existing workers first (in-flight jobs finish, nothing is
    /// killed), then restarts with `n` workers. Job IDs still on the channel
    /// survive the resize.
    pub async fn set_concurrency(&self, n: usize) -> EngineResult<()> {
        if n < 1 {
            return Err(EngineError::InvalidArgument(
                "concurrency must be at least 1".to_string(),
            ));
        }

        self.stop().await;
        {
            let mut pool = self.pool.lock().await;
            pool.concurrency = n;
        }
        self.start().await;
        tracing::info!("Job queue concurrency set to {}", n);
        Ok(())
    }

    /// Number of live workers (health reporting, tests).
    pub async fn worker_count(&self) -> usize {
        self.pool.lock().await.handles.len()
    }

    /// Configured concurrency.
    pub async fn concurrency(&self) -> usize {
        self.pool.lock().await.concurrency
    }

    /// IDs accepted but not yet picked up.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// IDs currently held by a worker.
    pub fn running_count(&self) -> usize {
        self.running.lock().map(|s| s.len()).unwrap_or(0)
    }
}

fn lock_set(
    set: &Arc<StdMutex<HashSet<Uuid>>>,
) -> EngineResult<std::sync::MutexGuard<'_, HashSet<Uuid>>> {
    set.lock()
        .map_err(|_| EngineError::Internal("queue set lock poisoned".to_string()))
}

fn spawn_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Uuid>>>,
    mut shutdown: watch::Receiver<bool>,
    pending: Arc<StdMutex<HashSet<Uuid>>>,
    running: Arc<StdMutex<HashSet<Uuid>>>,
    executor: Arc<dyn JobExecutor>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!("Worker {} started", worker_id);
        loop {
            // Hold the receiver lock only while waiting for the next job
            // ID; execution happens with the lock released so other workers
            // keep dispatching. The shutdown branch is polled first: a
            // draining worker exits here even when job IDs are still
            // queued, leaving them for the next generation.
            let message = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => None,
                    id = rx.recv() => id,
                }
            };

            let job_id = match message {
                Some(id) => id,
                None => break,
            };

            if let Ok(mut p) = pending.lock() {
                p.remove(&job_id);
            }

            // Re-check at pickup: a duplicate enqueue may have raced the
            // running set.
            let marked = running
                .lock()
                .map(|mut r| r.insert(job_id))
                .unwrap_or(false);
            if !marked {
                tracing::debug!(
                    "Worker {} skipping job {} (already running elsewhere)",
                    worker_id,
                    job_id
                );
                continue;
            }

            tracing::info!("Worker {} picked up job {}", worker_id, job_id);
            if let Err(err) = executor.execute(job_id).await {
                // One bad job never kills a worker.
                tracing::error!("Worker {} job {} failed: {:#}", worker_id, job_id, err);
            }

            if let Ok(mut r) = running.lock() {
                r.remove(&job_id);
            }
        }
        tracing::debug!("Worker {} exiting", worker_id);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Executor that records every execution and can simulate slow/failing
    /// jobs.
    struct CountingExecutor {
        executions: AtomicUsize,
        delay: Duration,
        fail_first: AtomicUsize,
    }

    impl CountingExecutor {
        fn new(delay_ms: u64) -> Self {
            Self {
                executions: AtomicUsize::new(0),
                delay: Duration::from_millis(delay_ms),
                fail_first: AtomicUsize::new(0),
            }
        }

        fn failing_first(n: usize) -> Self {
            let exec = Self::new(0);
            exec.fail_first.store(n, Ordering::SeqCst);
            exec
        }
    }

    #[async_trait]
    impl JobExecutor for CountingExecutor {
        async fn execute(&self, _job_id: Uuid) -> anyhow::Result<()> {
            let n = self.executions.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if n < self.fail_first.load(Ordering::SeqCst) {
                anyhow::bail!("simulated execution failure");
            }
            Ok(())
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_executes_once() {
        let executor = Arc::new(CountingExecutor::new(50));
        let queue = JobQueue::new(executor.clone(), 2);

        let id = Uuid::new_v4();
        queue.enqueue(id).await.unwrap();
        queue.enqueue(id).await.unwrap();

        settle().await;
        assert_eq!(executor.executions.load(Ordering::SeqCst), 1);
        assert_eq!(queue.running_count(), 0);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_enqueue_lazily_starts_the_queue() {
        let executor = Arc::new(CountingExecutor::new(0));
        let queue = JobQueue::new(executor.clone(), 1);

        assert_eq!(queue.worker_count().await, 0);
        queue.enqueue(Uuid::new_v4()).await.unwrap();
        assert_eq!(queue.worker_count().await, 1);

        settle().await;
        assert_eq!(executor.executions.load(Ordering::SeqCst), 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let queue = JobQueue::new(Arc::new(CountingExecutor::new(0)), 3);
        queue.start().await;
        queue.start().await;
        assert_eq!(queue.worker_count().await, 3);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_set_concurrency_rejects_zero() {
        let queue = JobQueue::new(Arc::new(CountingExecutor::new(0)), 3);
        let err = queue.set_concurrency(0).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_resize_keeps_pending_jobs_and_worker_count() {
        let executor = Arc::new(CountingExecutor::new(20));
        let queue = JobQueue::new(executor.clone(), 2);
        queue.start().await;

        for _ in 0..6 {
            queue.enqueue(Uuid::new_v4()).await.unwrap();
        }

        queue.set_concurrency(2).await.unwrap();
        queue.set_concurrency(5).await.unwrap();
        assert_eq!(queue.worker_count().await, 5);
        assert_eq!(queue.concurrency().await, 5);

        settle().await;
        assert_eq!(executor.executions.load(Ordering::SeqCst), 6);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_stop_does_not_dispatch_the_backlog() {
        let executor = Arc::new(CountingExecutor::new(200));
        let queue = JobQueue::new(executor.clone(), 1);

        for _ in 0..4 {
            queue.enqueue(Uuid::new_v4()).await.unwrap();
        }
        // Give the worker time to pick up the first job only.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let begun = std::time::Instant::now();
        queue.stop().await;

        // The worker finishes its current job and exits; the backlog stays
        // queued instead of being executed during the drain.
        assert!(begun.elapsed() < Duration::from_millis(400));
        assert_eq!(executor.executions.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_count(), 3);

        // A restarted pool picks the backlog up where it was left.
        queue.start().await;
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(executor.executions.load(Ordering::SeqCst), 4);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_execution_failure_does_not_kill_worker() {
        let executor = Arc::new(CountingExecutor::failing_first(1));
        let queue = JobQueue::new(executor.clone(), 1);

        queue.enqueue(Uuid::new_v4()).await.unwrap();
        settle().await;
        queue.enqueue(Uuid::new_v4()).await.unwrap();
        settle().await;

        assert_eq!(executor.executions.load(Ordering::SeqCst), 2);
        assert_eq!(queue.worker_count().await, 1);
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_safe_to_repeat() {
        let queue = JobQueue::new(Arc::new(CountingExecutor::new(0)), 2);
        queue.start().await;
        queue.stop().await;
        queue.stop().await;
        assert_eq!(queue.worker_count().await, 0);
    }
}
