//! Recurring timer driving registry sweeps.

use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};

use super::{Schedule, SchedulerError, Sweeper};

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Fires a sweep on every tick of a fixed schedule.
///
/// Uses `tokio-cron-scheduler` for the recurring timer; each tick runs in
/// its own task so a slow sweep never delays the next tick.
pub struct PollScheduler {
    scheduler: JobScheduler,
    job_id: uuid::Uuid,
    schedule: Schedule,
}

impl PollScheduler {
    /// Create the scheduler and register the sweep job. Call
    /// [`PollScheduler::start`] to begin ticking.
    pub async fn new(schedule: Schedule, sweeper: Sweeper) -> Result<Self, SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        let job = create_job(&schedule, sweeper)?;
        let job_id = scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        tracing::debug!(job_id = %job_id, schedule = %schedule, "Sweep job registered");
        Ok(Self {
            scheduler,
            job_id,
            schedule,
        })
    }

    /// Start ticking.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;
        tracing::info!(schedule = %self.schedule, "Poll scheduler started");
        Ok(())
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn job_id(&self) -> uuid::Uuid {
        self.job_id
    }

    /// Gracefully shutdown the scheduler with default timeout.
    pub async fn shutdown(self) -> Result<(), SchedulerError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown with custom timeout. Sweeps already running are not awaited.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) -> Result<(), SchedulerError> {
        let result = tokio::time::timeout(timeout, async {
            self.scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::Scheduler(e.to_string()))
        })
        .await;

        match result {
            Ok(Ok(())) => {
                tracing::info!("Poll scheduler shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Poll scheduler shutdown failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!("Poll scheduler shutdown timed out");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("job_id", &self.job_id)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

fn create_job(schedule: &Schedule, sweeper: Sweeper) -> Result<Job, SchedulerError> {
    let callback = move |_: uuid::Uuid, _: JobScheduler| {
        let sweeper = sweeper.clone();
        Box::pin(async move { sweeper.tick().await })
            as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
    };

    match schedule {
        Schedule::Interval(d) => Job::new_repeated_async(*d, callback),
        Schedule::Cron(expr) => Job::new_cron_job_async(expr.as_str(), callback),
    }
    .map_err(|e| SchedulerError::Scheduler(e.to_string()))
}
