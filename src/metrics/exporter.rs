//! Exporter self-metrics.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Counters describing the exporter itself.
///
/// Cheap to clone; every field is a handle onto shared atomics.
#[derive(Clone)]
pub struct ExporterMetrics {
    /// Completed polls by result (`success` / `failure`).
    pub polls_total: IntCounterVec,
    /// Poll actions rejected because the dispatch queues stayed full.
    pub dispatch_rejected_total: IntCounter,
    /// Tasks in the active registry.
    pub tasks: IntGauge,
    /// Reload attempts by result (`success` / `failure`).
    pub reloads_total: IntCounterVec,
}

impl ExporterMetrics {
    /// Create the metrics without registering them.
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            polls_total: IntCounterVec::new(
                Opts::new("mq_exporter_polls_total", "Queue polls by result"),
                &["result"],
            )?,
            dispatch_rejected_total: IntCounter::new(
                "mq_exporter_dispatch_rejected_total",
                "Poll actions rejected because the dispatch queues were full",
            )?,
            tasks: IntGauge::new("mq_exporter_tasks", "Number of active poll tasks")?,
            reloads_total: IntCounterVec::new(
                Opts::new("mq_exporter_reloads_total", "Configuration reloads by result"),
                &["result"],
            )?,
        })
    }

    /// Register every metric with `registry`.
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.polls_total.clone()))?;
        registry.register(Box::new(self.dispatch_rejected_total.clone()))?;
        registry.register(Box::new(self.tasks.clone()))?;
        registry.register(Box::new(self.reloads_total.clone()))?;
        Ok(())
    }

    pub fn record_poll(&self, success: bool) {
        self.polls_total
            .with_label_values(&[result_label(success)])
            .inc();
    }

    pub fn record_rejected(&self) {
        self.dispatch_rejected_total.inc();
    }

    pub fn record_reload(&self, success: bool) {
        self.reloads_total
            .with_label_values(&[result_label(success)])
            .inc();
    }

    pub fn set_tasks(&self, count: usize) {
        self.tasks.set(count as i64);
    }
}

fn result_label(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}
