//! Broker Layer
//!
//! Queue statistics retrieval from a broker's management API.
//!
//! - [`QueueStatsFetcher`]: capability used by poll tasks
//! - [`ManagementClient`]: HTTP implementation against the management API

mod client;

pub use client::ManagementClient;

use thiserror::Error;

use crate::config::BrokerSource;

/// Point-in-time statistics of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages ready for delivery.
    pub messages_ready: u64,
    /// Messages delivered but not yet acknowledged.
    pub messages_unacknowledged: u64,
    /// Cumulative publish count.
    pub publish: u64,
}

/// Errors that can occur while polling a broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Transport failure (connect, timeout, TLS).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The management API answered with a non-success status.
    #[error("management API returned {status} for queue '{queue}'")]
    Status {
        status: reqwest::StatusCode,
        queue: String,
    },

    /// The response body did not match the expected shape.
    #[error("invalid response: {0}")]
    Decode(String),

    /// The request could not be built from the broker source.
    #[error("invalid broker source: {0}")]
    InvalidSource(String),
}

/// Fetches queue statistics for one (broker, queue) pair.
#[async_trait::async_trait]
pub trait QueueStatsFetcher: Send + Sync + 'static {
    async fn fetch_queue_stats(
        &self,
        source: &BrokerSource,
        queue: &str,
    ) -> Result<QueueStats, BrokerError>;
}
