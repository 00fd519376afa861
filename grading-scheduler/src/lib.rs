//! Bounded-concurrency worker pool for OCR and grading jobs (`spec.md` §4.5).
//!
//! A fixed pool of `W` workers drains a bounded FIFO queue of capacity `Q`.
//! `Submit` backpressures the caller when the queue is full — there is
//! deliberately no non-blocking variant (`spec.md` §4.5: "producers must
//! experience back-pressure"). A failing job is logged and never terminates
//! its worker; ordering across workers is not guaranteed.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One unit of work. `id()` is expected to carry a kind prefix
/// (`ocr-<uuid>`, `grading-<uuid>`) so logs are attributable without the
/// pool itself knowing about job kinds.
#[async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> String;

    /// Must observe `cancel` promptly — when the pool is stopped, the token
    /// fires and in-flight work is expected to abandon cooperatively.
    async fn execute(&self, cancel: CancellationToken) -> Result<(), JobError>;
}

#[derive(Error, Debug)]
#[error("job {job_id} failed: {message}")]
pub struct JobError {
    pub job_id: String,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl JobError {
    pub fn new(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn from_source<E>(job_id: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            job_id: job_id.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

#[derive(Error, Debug)]
pub enum SubmitError {
    /// The pool has been stopped; the queue is closed.
    #[error("worker pool queue is closed")]
    Closed,
}

type BoxedJob = Box<dyn Job>;

struct PoolState {
    sender: parking_lot::Mutex<Option<mpsc::Sender<BoxedJob>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<BoxedJob>>>,
    num_workers: usize,
    cancel: CancellationToken,
    started: AtomicBool,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

/// A bounded pool of `num_workers` workers draining a queue of capacity
/// `queue_capacity`.
#[derive(Clone)]
pub struct WorkerPool {
    state: Arc<PoolState>,
}

impl WorkerPool {
    pub fn new(num_workers: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            state: Arc::new(PoolState {
                sender: parking_lot::Mutex::new(Some(tx)),
                receiver: Arc::new(tokio::sync::Mutex::new(rx)),
                num_workers: num_workers.max(1),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                handles: parking_lot::Mutex::new(Vec::new()),
            }),
        }
    }

    /// Places `job` on the queue. Blocks the caller if the queue is full —
    /// by design, there is no non-blocking variant (`spec.md` §4.5).
    pub async fn submit(&self, job: BoxedJob) -> Result<(), SubmitError> {
        let sender = self.state.sender.lock().clone();
        match sender {
            Some(tx) => tx.send(job).await.map_err(|_| SubmitError::Closed),
            None => Err(SubmitError::Closed),
        }
    }

    /// Launches workers. Idempotent: a second call is a no-op.
    pub fn start(&self) {
        if self.state.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut handles = self.state.handles.lock();
        for worker_id in 0..self.state.num_workers {
            let receiver = Arc::clone(&self.state.receiver);
            let cancel = self.state.cancel.clone();
            handles.push(tokio::spawn(worker_loop(worker_id, receiver, cancel)));
        }
        info!(num_workers = self.state.num_workers, "worker pool started");
    }

    /// Cancels the pool context, closes the queue (no more `submit` calls
    /// will succeed — callers already in a blocked `submit` must coordinate
    /// their own shutdown, per `spec.md` §4.5), and waits for in-flight jobs
    /// to drain.
    pub async fn stop(&self) {
        self.state.cancel.cancel();
        *self.state.sender.lock() = None;
        let handles = std::mem::take(&mut *self.state.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("worker pool stopped");
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.state.cancel.clone()
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<BoxedJob>>>,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut guard = receiver.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                maybe_job = guard.recv() => maybe_job,
            }
        };

        let Some(job) = job else {
            break;
        };

        let job_id = job.id();
        info!(worker_id, job_id = %job_id, "job started");
        match job.execute(cancel.clone()).await {
            Ok(()) => info!(worker_id, job_id = %job_id, "job completed"),
            Err(err) => warn!(worker_id, job_id = %job_id, error = %err, "job failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingJob {
        id: String,
        counter: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn id(&self) -> String {
            self.id.clone()
        }

        async fn execute(&self, _cancel: CancellationToken) -> Result<(), JobError> {
            tokio::time::sleep(self.delay).await;
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingJob {
        id: String,
    }

    #[async_trait]
    impl Job for FailingJob {
        fn id(&self) -> String {
            self.id.clone()
        }

        async fn execute(&self, _cancel: CancellationToken) -> Result<(), JobError> {
            Err(JobError::new(self.id.clone(), "boom"))
        }
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let pool = WorkerPool::new(2, 4);
        pool.start();
        pool.start(); // must not spawn a second round of workers
        assert_eq!(pool.state.handles.lock().len(), 2);
        pool.stop().await;
    }

    #[tokio::test]
    async fn a_failing_job_never_terminates_its_worker() {
        let pool = WorkerPool::new(1, 4);
        pool.start();
        let counter = Arc::new(AtomicUsize::new(0));
        pool.submit(Box::new(FailingJob {
            id: "grading-1".to_string(),
        }))
        .await
        .unwrap();
        pool.submit(Box::new(CountingJob {
            id: "grading-2".to_string(),
            counter: Arc::clone(&counter),
            delay: Duration::from_millis(1),
        }))
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        pool.stop().await;
    }

    /// S6 — pool back-pressure: W=2, Q=2, 5 submits; the 5th blocks until a
    /// worker frees a slot; no job is dropped, all five execute exactly once.
    #[tokio::test]
    async fn back_pressure_blocks_producer_until_capacity_frees() {
        let pool = WorkerPool::new(2, 2);
        pool.start();
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..5 {
            pool.submit(Box::new(CountingJob {
                id: format!("grading-{i}"),
                counter: Arc::clone(&counter),
                delay: Duration::from_millis(20),
            }))
            .await
            .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        pool.stop().await;
    }

    #[tokio::test]
    async fn stop_closes_the_queue() {
        let pool = WorkerPool::new(1, 2);
        pool.start();
        pool.stop().await;
        let result = pool
            .submit(Box::new(FailingJob {
                id: "grading-late".to_string(),
            }))
            .await;
        assert!(matches!(result, Err(SubmitError::Closed)));
    }
}
