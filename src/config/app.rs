//! Process-wide settings.
//!
//! These values are fixed when the process starts and are never reloaded.

use std::net::SocketAddr;
use std::time::Duration;

use crate::pool::PoolConfig;
use crate::scheduler::Schedule;

use super::validation::ConfigError;

// =============================================================================
// Constants
// =============================================================================

/// Default tick cadence (5 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of worker tasks draining the dispatch queues.
pub const DEFAULT_WORKERS: usize = 2000;

/// Default number of dispatch queues (shards).
pub const DEFAULT_QUEUE_NUMBER: usize = 16;

/// Default buffer length of each dispatch queue.
pub const DEFAULT_QUEUE_LENGTH: usize = 128;

/// Default time a submission may wait for room in a full queue.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default bound on each outbound HTTP request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8082";

/// Default key prefix in the remote key-value store.
pub const DEFAULT_CONSUL_PREFIX: &str = "mq-exporter/config";

// =============================================================================
// Settings
// =============================================================================

/// Top-level process settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Local monitor document path, used when no remote store is configured.
    pub config_path: String,
    /// Remote key-value store address.
    pub consul_addr: Option<String>,
    /// Key prefix listed in the remote store.
    pub consul_prefix: String,
    /// ACL token sent to the remote store.
    pub consul_token: Option<String>,
    /// HTTP listen address.
    pub listen_addr: SocketAddr,
    /// Base32 shared secret guarding `/reload` and `/exit`.
    pub secret: Option<String>,
    /// Tick cadence.
    pub schedule: Schedule,
    /// Number of worker tasks.
    pub workers: usize,
    /// Number of dispatch queues.
    pub queue_number: usize,
    /// Buffer length of each dispatch queue.
    pub queue_length: usize,
    /// Time a submission may wait on a full queue before it is rejected.
    pub submit_timeout: Duration,
    /// Bound on each broker or remote-store request.
    pub request_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: "./config/config.yaml".to_string(),
            consul_addr: None,
            consul_prefix: DEFAULT_CONSUL_PREFIX.to_string(),
            consul_token: None,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8082)),
            secret: None,
            schedule: Schedule::default(),
            workers: DEFAULT_WORKERS,
            queue_number: DEFAULT_QUEUE_NUMBER,
            queue_length: DEFAULT_QUEUE_LENGTH,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl Settings {
    /// Validate settings values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ValidationError(
                "workers must be positive".to_string(),
            ));
        }
        if self.queue_number == 0 {
            return Err(ConfigError::ValidationError(
                "queue number must be positive".to_string(),
            ));
        }
        if self.workers < self.queue_number {
            return Err(ConfigError::ValidationError(format!(
                "workers ({}) must be at least the queue number ({}) so every queue has a reader",
                self.workers, self.queue_number
            )));
        }
        if self.queue_length == 0 {
            return Err(ConfigError::ValidationError(
                "queue length must be positive".to_string(),
            ));
        }
        if self.submit_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "submit timeout must be non-zero".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "request timeout must be non-zero".to_string(),
            ));
        }
        if self.consul_prefix.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "consul prefix cannot be empty".to_string(),
            ));
        }
        if self.consul_addr.is_none() && self.config_path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "either a config path or a consul address is required".to_string(),
            ));
        }
        if self.secret.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "secret cannot be blank".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker pool shape.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            queues: self.queue_number,
            queue_length: self.queue_length,
            submit_timeout: self.submit_timeout,
        }
    }

    /// Whether the monitor document comes from the remote store.
    pub fn uses_remote_config(&self) -> bool {
        self.consul_addr.is_some()
    }
}

/// Parse a listen address, accepting the `:port` shorthand for all interfaces.
///
/// ```
/// use mq_exporter::config::parse_listen_addr;
///
/// assert_eq!(parse_listen_addr(":8082").unwrap().port(), 8082);
/// assert!(parse_listen_addr("127.0.0.1:9000").is_ok());
/// ```
pub fn parse_listen_addr(s: &str) -> Result<SocketAddr, String> {
    let s = s.trim();
    let candidate = if s.starts_with(':') {
        format!("0.0.0.0{}", s)
    } else {
        s.to_string()
    };
    candidate
        .parse()
        .map_err(|_| format!("invalid listen address: '{}'", s))
}
