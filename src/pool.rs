//! Bounded worker pool for poll actions.
//!
//! A fixed set of worker tasks drains a fixed number of bounded queues.
//! Worker `i` consumes queue `i % queues`; submissions are spread over the
//! queues round-robin.
//!
//! ```text
//! submit() ──round-robin──► queue 0 ──► workers 0, 16, 32, ...
//!                          queue 1 ──► workers 1, 17, 33, ...
//!                          ...
//! ```
//!
//! When the selected queue is full a submission waits up to the configured
//! submit timeout and is then rejected with [`DispatchError::Saturated`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::task::JoinHandle;

/// A unit of work run by the pool.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Default timeout when waiting for workers on shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by [`WorkerPool::submit`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The target queue stayed full for the whole submit timeout.
    #[error("dispatch queue {queue} is full")]
    Saturated { queue: usize },

    /// The pool has been shut down.
    #[error("worker pool is closed")]
    Closed,
}

/// Shape of a worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Number of queues.
    pub queues: usize,
    /// Buffer length of each queue.
    pub queue_length: usize,
    /// Time a submission may wait on a full queue.
    pub submit_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: crate::config::DEFAULT_WORKERS,
            queues: crate::config::DEFAULT_QUEUE_NUMBER,
            queue_length: crate::config::DEFAULT_QUEUE_LENGTH,
            submit_timeout: crate::config::DEFAULT_SUBMIT_TIMEOUT,
        }
    }
}

/// Fixed-size pool of async workers fed by sharded bounded queues.
pub struct WorkerPool {
    senders: RwLock<Vec<flume::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
    config: PoolConfig,
}

impl WorkerPool {
    /// Spawn the workers. Must be called inside a Tokio runtime.
    ///
    /// Zero counts are raised to one, and workers to at least one per queue
    /// so that every queue has a reader.
    pub fn new(config: PoolConfig) -> Self {
        let queues = config.queues.max(1);
        if config.workers < queues {
            tracing::warn!(
                workers = config.workers,
                queues,
                "Fewer workers than queues, raising worker count"
            );
        }
        let config = PoolConfig {
            workers: config.workers.max(queues),
            queues,
            queue_length: config.queue_length.max(1),
            submit_timeout: config.submit_timeout,
        };

        let (senders, receivers): (Vec<_>, Vec<_>) = (0..config.queues)
            .map(|_| flume::bounded::<Job>(config.queue_length))
            .unzip();

        let workers = (0..config.workers)
            .map(|id| {
                let receiver = receivers[id % config.queues].clone();
                tokio::spawn(run_worker(id, receiver))
            })
            .collect();

        tracing::info!(
            workers = config.workers,
            queues = config.queues,
            queue_length = config.queue_length,
            "Worker pool started"
        );

        Self {
            senders: RwLock::new(senders),
            workers: Mutex::new(workers),
            next: AtomicUsize::new(0),
            config,
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Jobs waiting in the queues.
    pub fn queued(&self) -> usize {
        self.senders.read().iter().map(|s| s.len()).sum()
    }

    pub fn is_closed(&self) -> bool {
        self.senders.read().is_empty()
    }

    /// Queue a job without waiting for it to run.
    ///
    /// # Errors
    /// `DispatchError::Saturated` if the selected queue stayed full for the
    /// submit timeout, `DispatchError::Closed` after shutdown.
    pub async fn submit(&self, job: Job) -> Result<(), DispatchError> {
        let (queue, sender) = {
            let senders = self.senders.read();
            if senders.is_empty() {
                return Err(DispatchError::Closed);
            }
            let queue = self.next.fetch_add(1, Ordering::Relaxed) % senders.len();
            (queue, senders[queue].clone())
        };

        let job = match sender.try_send(job) {
            Ok(()) => return Ok(()),
            Err(flume::TrySendError::Disconnected(_)) => return Err(DispatchError::Closed),
            Err(flume::TrySendError::Full(job)) => job,
        };

        match tokio::time::timeout(self.config.submit_timeout, sender.send_async(job)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DispatchError::Closed),
            Err(_) => Err(DispatchError::Saturated { queue }),
        }
    }

    /// Queue a job only if the selected queue has room right now.
    ///
    /// # Errors
    /// `DispatchError::Saturated` if the queue is full, `DispatchError::Closed`
    /// after shutdown.
    pub fn try_submit(&self, job: Job) -> Result<(), DispatchError> {
        let senders = self.senders.read();
        if senders.is_empty() {
            return Err(DispatchError::Closed);
        }
        let queue = self.next.fetch_add(1, Ordering::Relaxed) % senders.len();
        senders[queue].try_send(job).map_err(|e| match e {
            flume::TrySendError::Full(_) => DispatchError::Saturated { queue },
            flume::TrySendError::Disconnected(_) => DispatchError::Closed,
        })
    }

    /// Shut down with the default timeout.
    pub async fn shutdown(&self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await;
    }

    /// Stop accepting jobs and wait for workers to drain their queues.
    ///
    /// Workers still busy when `timeout` elapses are aborted.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) {
        // Dropping every sender ends the workers once the queues are empty.
        drop(std::mem::take(&mut *self.senders.write()));
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }

        let aborts: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();
        let drained = tokio::time::timeout(timeout, futures::future::join_all(workers)).await;
        if drained.is_err() {
            tracing::warn!(
                timeout = ?timeout,
                "Worker pool shutdown timed out, aborting workers"
            );
            aborts.iter().for_each(|a| a.abort());
        } else {
            tracing::info!("Worker pool shutdown complete");
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

/// Run jobs from one queue until every sender is gone.
async fn run_worker(id: usize, receiver: flume::Receiver<Job>) {
    while let Ok(job) = receiver.recv_async().await {
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            tracing::error!(worker = id, "Poll action panicked");
        }
    }
}
