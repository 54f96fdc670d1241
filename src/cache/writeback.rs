//! Bounded pool for detached cache writes.
//!
//! Reads return to the caller before their results are written back. Those
//! writes are queued here and drained by a fixed set of workers, each write
//! under its own deadline. A full queue sheds the write instead of blocking.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, warn};

use super::keys::CacheNamespace;

const METRIC_WRITEBACK_DROPPED_TOTAL: &str = "darkroom_cache_writeback_dropped_total";
const METRIC_WRITEBACK_TIMEOUT_TOTAL: &str = "darkroom_cache_writeback_timeout_total";

struct Job {
    namespace: CacheNamespace,
    task: BoxFuture<'static, ()>,
}

struct PoolState {
    pending: AtomicUsize,
    idle: Notify,
    timeout: Duration,
}

impl PoolState {
    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Handle to the write-back workers. Cloning shares the same queue.
///
/// Workers exit once every handle has been dropped and the queue is drained.
#[derive(Clone)]
pub struct WriteBackPool {
    sender: mpsc::Sender<Job>,
    state: Arc<PoolState>,
}

impl WriteBackPool {
    /// Starts `workers` tasks on the current tokio runtime.
    pub fn spawn(workers: usize, queue: usize, timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(queue.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let state = Arc::new(PoolState {
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            timeout,
        });

        for worker in 0..workers.max(1) {
            tokio::spawn(worker_loop(
                worker,
                Arc::clone(&receiver),
                Arc::clone(&state),
            ));
        }

        Self { sender, state }
    }

    /// Queues `task`. Returns `false` when the write was shed.
    pub fn submit<F>(&self, namespace: CacheNamespace, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.state.pending.fetch_add(1, Ordering::AcqRel);
        let job = Job {
            namespace,
            task: task.boxed(),
        };

        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(err) => {
                self.state.finish();
                let reason = match err {
                    mpsc::error::TrySendError::Full(_) => "queue_full",
                    mpsc::error::TrySendError::Closed(_) => "closed",
                };
                warn!(
                    namespace = namespace.as_str(),
                    reason, "Dropped cache write-back"
                );
                counter!(METRIC_WRITEBACK_DROPPED_TOTAL, "namespace" => namespace.as_str())
                    .increment(1);
                false
            }
        }
    }

    /// Number of writes queued or running.
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::Acquire)
    }

    /// Resolves once no write is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn worker_loop(worker: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>, state: Arc<PoolState>) {
    loop {
        let next = { receiver.lock().await.recv().await };
        let Some(job) = next else {
            debug!(worker, "Cache write-back worker stopped");
            return;
        };

        let namespace = job.namespace.as_str();
        let guarded = AssertUnwindSafe(job.task).catch_unwind();
        match tokio::time::timeout(state.timeout, guarded).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                warn!(worker, namespace, "Cache write-back panicked");
            }
            Err(_) => {
                warn!(
                    worker,
                    namespace,
                    timeout_ms = state.timeout.as_millis() as u64,
                    "Cache write-back timed out"
                );
                counter!(METRIC_WRITEBACK_TIMEOUT_TOTAL, "namespace" => namespace).increment(1);
            }
        }
        state.finish();
    }
}
