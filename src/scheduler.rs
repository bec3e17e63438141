//! Scheduler Layer
//!
//! Recurring sweep of the live task registry.
//!
//! # Architecture
//!
//! - [`Schedule`]: tick cadence (fixed interval or cron)
//! - [`Sweeper`]: one sweep, submitting every task's poll to the worker pool
//! - [`PollScheduler`]: recurring timer driving the sweeper
//!
//! A sweep never waits for polls to finish and keeps no per-task state, so a
//! slow poll may still be running when the same task is submitted again on
//! the next tick.

mod schedule;
mod sweep;
mod timer;

pub use schedule::{MIN_INTERVAL, Schedule, SchedulerError};
pub use sweep::{SweepReport, Sweeper};
pub use timer::{DEFAULT_SHUTDOWN_TIMEOUT, PollScheduler};
