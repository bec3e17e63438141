//! One sweep over the live task registry.

use std::sync::Arc;
use std::time::Instant;

use crate::broker::QueueStatsFetcher;
use crate::metrics::ExporterMetrics;
use crate::pool::{DispatchError, Job, WorkerPool};
use crate::task::{SharedRegistry, TaskDescriptor};

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Generation of the registry snapshot that was swept.
    pub generation: u64,
    /// Poll actions accepted by the pool.
    pub submitted: usize,
    /// Poll actions rejected because the pool stayed saturated.
    pub rejected: usize,
    /// The pool was closed before every task could be submitted.
    pub closed: bool,
}

/// Submits every task of the live registry to the worker pool.
///
/// Cheap to clone; shared by every tick of the timer.
#[derive(Clone)]
pub struct Sweeper {
    registry: SharedRegistry,
    pool: Arc<WorkerPool>,
    fetcher: Arc<dyn QueueStatsFetcher>,
    metrics: ExporterMetrics,
}

impl Sweeper {
    pub fn new(
        registry: SharedRegistry,
        pool: Arc<WorkerPool>,
        fetcher: Arc<dyn QueueStatsFetcher>,
        metrics: ExporterMetrics,
    ) -> Self {
        Self {
            registry,
            pool,
            fetcher,
            metrics,
        }
    }

    /// Submit one poll per task of the current registry snapshot.
    ///
    /// The snapshot is taken once, so a reload published mid-sweep takes
    /// effect on the next sweep. Once a submission times out on a saturated
    /// queue the rest of the sweep only submits where room is immediately
    /// available, so a backed-up pool cannot stall the timer.
    pub async fn sweep(&self) -> SweepReport {
        let snapshot = self.registry.snapshot();
        let mut report = SweepReport {
            generation: snapshot.generation(),
            ..SweepReport::default()
        };
        let mut saturated = false;

        for task in snapshot.tasks() {
            let job = self.poll_job(Arc::clone(task));
            let result = if saturated {
                self.pool.try_submit(job)
            } else {
                self.pool.submit(job).await
            };

            match result {
                Ok(()) => report.submitted += 1,
                Err(DispatchError::Saturated { queue }) => {
                    saturated = true;
                    report.rejected += 1;
                    self.metrics.record_rejected();
                    tracing::warn!(
                        metric = %task.key(),
                        queue,
                        "Dispatch queue full, poll skipped for this tick"
                    );
                }
                Err(DispatchError::Closed) => {
                    report.closed = true;
                    tracing::warn!("Worker pool closed, stopping sweep");
                    break;
                }
            }
        }

        report
    }

    /// Run a sweep and log its outcome. Used as the timer callback.
    pub async fn tick(&self) {
        let report = self.sweep().await;
        tracing::debug!(
            generation = report.generation,
            submitted = report.submitted,
            rejected = report.rejected,
            "Sweep complete"
        );
    }

    fn poll_job(&self, task: Arc<TaskDescriptor>) -> Job {
        let fetcher = Arc::clone(&self.fetcher);
        let metrics = self.metrics.clone();
        Box::pin(async move { run_poll(&task, fetcher.as_ref(), &metrics).await })
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Execute one poll and record the result.
async fn run_poll(task: &TaskDescriptor, fetcher: &dyn QueueStatsFetcher, metrics: &ExporterMetrics) {
    let start = Instant::now();
    let result = task.poll(fetcher).await;
    let duration_ms = start.elapsed().as_millis();

    match result {
        Ok(stats) => {
            tracing::debug!(
                metric = %task.key(),
                ready = stats.messages_ready,
                unacked = stats.messages_unacknowledged,
                publish = stats.publish,
                duration_ms,
                "Poll succeeded"
            );
            metrics.record_poll(true);
        }
        Err(e) => {
            tracing::error!(
                metric = %task.key(),
                apiurl = %task.source().api_url,
                vhost = %task.source().vhost,
                queue = %task.queue(),
                duration_ms,
                error = %e,
                "Poll failed"
            );
            metrics.record_poll(false);
        }
    }
}
