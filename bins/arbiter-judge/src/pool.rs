/// Worker pool - amortizes sandbox startup across submissions.
///
/// A fixed number of workers is created up front and their handles circulate
/// through a bounded channel: `lease` is a receive, release is a send done
/// by the lease guard on drop. Channel occupancy therefore always equals the
/// number of unleased workers, and reuse is FIFO. The pool never shrinks; a
/// worker judged dead is discarded and replaced asynchronously.
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::sandbox::SandboxError;

/// Consecutive exec transport failures after which a worker is discarded.
pub const DEAD_AFTER_FAILURES: u32 = 2;

/// Backend that can create and destroy worker environments. Implemented by
/// `DockerSandbox` in production and stubbed in tests.
#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    async fn create_worker(&self) -> Result<String, SandboxError>;
    async fn remove_worker(&self, worker_id: &str);
}

#[derive(Debug)]
struct Worker {
    id: String,
    consecutive_failures: u32,
}

pub struct WorkerPool {
    tx: mpsc::Sender<Worker>,
    rx: Mutex<mpsc::Receiver<Worker>>,
    runtime: Arc<dyn WorkerRuntime>,
    size: usize,
}

impl WorkerPool {
    /// Create and start `size` workers, seeding the channel with their ids.
    pub async fn start(
        runtime: Arc<dyn WorkerRuntime>,
        size: usize,
    ) -> Result<Arc<Self>, SandboxError> {
        let (tx, rx) = mpsc::channel(size);

        for _ in 0..size {
            let id = runtime.create_worker().await?;
            let worker = Worker {
                id,
                consecutive_failures: 0,
            };
            if tx.send(worker).await.is_err() {
                return Err(SandboxError::Unavailable("worker pool closed".into()));
            }
        }

        info!(worker_count = size, "Worker pool ready");
        Ok(Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
            runtime,
            size,
        }))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Block until a worker is free. First released, first reused.
    pub async fn lease(&self) -> Result<WorkerLease, SandboxError> {
        let worker = {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };
        match worker {
            Some(worker) => Ok(WorkerLease {
                worker: Some(worker),
                tx: self.tx.clone(),
                runtime: self.runtime.clone(),
            }),
            None => Err(SandboxError::Unavailable("worker pool closed".into())),
        }
    }

    /// Remove every currently idle worker. Leased workers are removed by
    /// their guards once the in-flight cycles finish.
    pub async fn shutdown(&self) {
        let mut rx = self.rx.lock().await;
        while let Ok(worker) = rx.try_recv() {
            self.runtime.remove_worker(&worker.id).await;
        }
        info!("Worker pool drained");
    }
}

/// Exclusive possession of one worker. Dropping the lease returns the worker
/// to the pool on every exit path; a worker past the failure threshold is
/// discarded and replaced instead.
pub struct WorkerLease {
    worker: Option<Worker>,
    tx: mpsc::Sender<Worker>,
    runtime: Arc<dyn WorkerRuntime>,
}

impl WorkerLease {
    pub fn worker_id(&self) -> &str {
        self.worker
            .as_ref()
            .map(|w| w.id.as_str())
            .unwrap_or_default()
    }

    /// Record an exec transport failure; returns the consecutive count.
    pub fn record_exec_failure(&mut self) -> u32 {
        match self.worker.as_mut() {
            Some(worker) => {
                worker.consecutive_failures += 1;
                worker.consecutive_failures
            }
            None => 0,
        }
    }

    pub fn record_exec_success(&mut self) {
        if let Some(worker) = self.worker.as_mut() {
            worker.consecutive_failures = 0;
        }
    }

    pub fn is_dead(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| w.consecutive_failures >= DEAD_AFTER_FAILURES)
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        if worker.consecutive_failures >= DEAD_AFTER_FAILURES {
            warn!(worker_id = %worker.id, "Discarding dead worker, creating replacement");
            let runtime = self.runtime.clone();
            let tx = self.tx.clone();
            tokio::spawn(async move {
                runtime.remove_worker(&worker.id).await;
                match runtime.create_worker().await {
                    Ok(id) => {
                        let replacement = Worker {
                            id,
                            consecutive_failures: 0,
                        };
                        if tx.send(replacement).await.is_err() {
                            warn!("Worker pool closed before replacement could join");
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to create replacement worker"),
                }
            });
            return;
        }

        // The channel holds one slot per live worker, so this send cannot
        // fail while the pool is open.
        if self.tx.try_send(worker).is_err() {
            warn!("Worker released into a closed pool");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubRuntime {
        counter: AtomicUsize,
        removed: std::sync::Mutex<Vec<String>>,
    }

    impl StubRuntime {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                counter: AtomicUsize::new(0),
                removed: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl WorkerRuntime for StubRuntime {
        async fn create_worker(&self) -> Result<String, SandboxError> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("w{n}"))
        }

        async fn remove_worker(&self, worker_id: &str) {
            self.removed.lock().unwrap().push(worker_id.to_string());
        }
    }

    #[tokio::test]
    async fn lease_is_fifo_over_releases() {
        let pool = WorkerPool::start(StubRuntime::new(), 2).await.unwrap();

        let first = pool.lease().await.unwrap();
        assert_eq!(first.worker_id(), "w0");
        drop(first); // back of the queue

        let second = pool.lease().await.unwrap();
        assert_eq!(second.worker_id(), "w1");
        let recycled = pool.lease().await.unwrap();
        assert_eq!(recycled.worker_id(), "w0");
    }

    #[tokio::test]
    async fn lease_blocks_until_release() {
        let pool = WorkerPool::start(StubRuntime::new(), 1).await.unwrap();

        let held = pool.lease().await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.lease()).await;
        assert!(blocked.is_err(), "second lease must block while pool is empty");

        drop(held);
        let lease = tokio::time::timeout(Duration::from_millis(50), pool.lease())
            .await
            .expect("release must unblock a waiting lease")
            .unwrap();
        assert_eq!(lease.worker_id(), "w0");
    }

    #[tokio::test]
    async fn failure_counter_resets_on_success() {
        let pool = WorkerPool::start(StubRuntime::new(), 1).await.unwrap();

        let mut lease = pool.lease().await.unwrap();
        assert_eq!(lease.record_exec_failure(), 1);
        assert!(!lease.is_dead());
        lease.record_exec_success();
        assert_eq!(lease.record_exec_failure(), 1);
        drop(lease);

        // A healthy worker keeps its identity across leases.
        let lease = pool.lease().await.unwrap();
        assert_eq!(lease.worker_id(), "w0");
    }

    #[tokio::test]
    async fn dead_worker_is_discarded_and_replaced() {
        let runtime = StubRuntime::new();
        let pool = WorkerPool::start(runtime.clone(), 1).await.unwrap();

        let mut lease = pool.lease().await.unwrap();
        lease.record_exec_failure();
        lease.record_exec_failure();
        assert!(lease.is_dead());
        drop(lease);

        // The replacement is created on a spawned task.
        let replacement = tokio::time::timeout(Duration::from_secs(1), pool.lease())
            .await
            .expect("replacement must arrive")
            .unwrap();
        assert_eq!(replacement.worker_id(), "w1");
        assert_eq!(runtime.removed.lock().unwrap().as_slice(), ["w0"]);
    }

    #[tokio::test]
    async fn shutdown_removes_idle_workers() {
        let runtime = StubRuntime::new();
        let pool = WorkerPool::start(runtime.clone(), 3).await.unwrap();

        pool.shutdown().await;
        let removed = runtime.removed.lock().unwrap();
        assert_eq!(removed.len(), 3);
    }
}
