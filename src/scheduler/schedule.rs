//! Tick cadence.

use std::time::Duration;

use thiserror::Error;

/// Minimum allowed interval (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Errors raised by the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Invalid schedule definition.
    #[error("config error: {0}")]
    Config(String),

    /// The underlying job scheduler failed.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// Cadence of registry sweeps.
///
/// Fixed for the lifetime of the process; reloads never change it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval between sweeps.
    ///
    /// Interval is clamped to a minimum of 1 second.
    Interval(Duration),

    /// Cron expression, 6-field `sec min hour day month weekday`.
    /// Example: `"*/5 * * * * *"` = every 5 seconds
    Cron(String),
}

impl Schedule {
    /// Create an interval schedule, clamped to [`MIN_INTERVAL`].
    pub fn interval(duration: Duration) -> Self {
        if duration < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            Self::Interval(MIN_INTERVAL)
        } else {
            Self::Interval(duration)
        }
    }

    /// Create a cron schedule with immediate validation.
    ///
    /// # Errors
    /// Returns `SchedulerError::Config` if the cron expression is invalid.
    pub fn cron(expr: impl AsRef<str>) -> Result<Self, SchedulerError> {
        use std::str::FromStr;

        let expr = expr.as_ref().trim();
        cron::Schedule::from_str(expr)
            .map_err(|e| SchedulerError::Config(format!("invalid cron expression: {e}")))?;

        Ok(Self::Cron(expr.to_string()))
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Interval(crate::config::DEFAULT_INTERVAL)
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval(d) => write!(f, "every {:?}", d),
            Self::Cron(expr) => write!(f, "cron: {}", expr),
        }
    }
}
