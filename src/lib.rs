//! mq-exporter - Queue Statistics Exporter Library
//!
//! Polls message-broker management APIs on a fixed cadence and republishes
//! per-queue statistics as Prometheus gauges. The set of monitored queues is
//! reloadable at runtime without restarting the process.
//!
//! # Architecture
//!
//! - **Config**: process settings and the reloadable monitor document
//! - **Task**: one poll task per metric key, held in an immutable registry
//! - **Scheduler**: recurring sweep submitting every task to the worker pool
//! - **Pool**: bounded, sharded worker pool executing polls
//! - **Reload**: rebuilds and atomically swaps the task registry
//! - **Metrics**: gauge registration and text exposition
//! - **Server**: `/metrics`, `/reload`, `/exit` and probes
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mq_exporter::{
//!     FileSource, GaugeRegistry, ManagementClient, PollScheduler, PoolConfig,
//!     ReloadCoordinator, Schedule, SharedRegistry, Sweeper, WorkerPool,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gauges = Arc::new(GaugeRegistry::new()?);
//!     let registry = SharedRegistry::default();
//!     let reloader = ReloadCoordinator::new(
//!         Arc::new(FileSource::new("config.yaml")),
//!         Arc::clone(&gauges),
//!         registry.clone(),
//!     );
//!     reloader.reload().await?;
//!
//!     let pool = Arc::new(WorkerPool::new(PoolConfig::default()));
//!     let fetcher = Arc::new(ManagementClient::new(std::time::Duration::from_secs(10))?);
//!     let sweeper = Sweeper::new(registry, pool, fetcher, gauges.exporter().clone());
//!     let scheduler = PollScheduler::new(Schedule::default(), sweeper).await?;
//!     scheduler.start().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod broker;
pub mod config;
pub mod metrics;
pub mod pool;
pub mod reload;
pub mod scheduler;
pub mod server;
pub mod task;

pub use auth::{ActionGuard, AuthError, CodeVerifier, TotpVerifier};
pub use broker::{BrokerError, ManagementClient, QueueStats, QueueStatsFetcher};
pub use config::{
    BrokerSource, ConfigError, ConfigSource, ConsulSource, FileSource, MonitorConfig,
    MonitorSpec, Settings,
};
pub use metrics::{ExporterMetrics, GaugeRegistry, MetricsError};
pub use pool::{DispatchError, PoolConfig, WorkerPool};
pub use reload::{ReloadCoordinator, ReloadError, ReloadOutcome, ReloadState};
pub use scheduler::{PollScheduler, Schedule, SchedulerError, SweepReport, Sweeper};
pub use task::{SharedRegistry, TaskDescriptor, TaskRegistry};
