//! A single poll task.

use prometheus::GaugeVec;

use crate::broker::{BrokerError, QueueStats, QueueStatsFetcher};
use crate::config::BrokerSource;
use crate::metrics::{MESSAGE_PUBLISH, MESSAGE_READY, MESSAGE_UNACKNOWLEDGED};

/// One metric key bound to a broker queue.
///
/// The broker source and queue name are owned copies taken when the
/// descriptor is built; nothing here refers back into the configuration.
#[derive(Clone)]
pub struct TaskDescriptor {
    key: String,
    source: BrokerSource,
    queue: String,
    description: String,
    gauge: GaugeVec,
}

impl TaskDescriptor {
    pub fn new(
        key: impl Into<String>,
        source: BrokerSource,
        queue: impl Into<String>,
        description: impl Into<String>,
        gauge: GaugeVec,
    ) -> Self {
        Self {
            key: key.into(),
            source,
            queue: queue.into(),
            description: description.into(),
            gauge,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn source(&self) -> &BrokerSource {
        &self.source
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn gauge(&self) -> &GaugeVec {
        &self.gauge
    }

    /// Run one poll: fetch the queue statistics and overwrite the gauge.
    ///
    /// On failure the gauge is left untouched and the error is returned for
    /// the caller to log. No retry is attempted.
    pub async fn poll(&self, fetcher: &dyn QueueStatsFetcher) -> Result<QueueStats, BrokerError> {
        let stats = fetcher.fetch_queue_stats(&self.source, &self.queue).await?;
        self.record(&stats);
        Ok(stats)
    }

    fn record(&self, stats: &QueueStats) {
        let desc = self.description.as_str();
        self.gauge
            .with_label_values(&[MESSAGE_READY, desc])
            .set(stats.messages_ready as f64);
        self.gauge
            .with_label_values(&[MESSAGE_UNACKNOWLEDGED, desc])
            .set(stats.messages_unacknowledged as f64);
        self.gauge
            .with_label_values(&[MESSAGE_PUBLISH, desc])
            .set(stats.publish as f64);
    }
}

impl std::fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("key", &self.key)
            .field("source", &self.source)
            .field("queue", &self.queue)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
