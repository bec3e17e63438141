//! Metrics Layer
//!
//! Prometheus exposition for queue gauges and the exporter's own counters.
//!
//! - [`GaugeRegistry`]: tracks one `GaugeVec` per metric key, swaps in a
//!   rebuilt registry on every commit and renders the text exposition format
//! - [`ExporterMetrics`]: self-metrics under the `mq_exporter_` prefix

mod exporter;
mod gauges;

pub use exporter::ExporterMetrics;
pub use gauges::{GaugeRegistry, MetricsError, PreparedGauge, RegistryChanges, gauge_help};

/// Label holding the quantity name.
pub const ATTR_LABEL: &str = "attr";

/// Label holding the monitor description.
pub const DESC_LABEL: &str = "desc";

/// `attr` value for messages ready for delivery.
pub const MESSAGE_READY: &str = "message_ready";

/// `attr` value for delivered but unacknowledged messages.
pub const MESSAGE_UNACKNOWLEDGED: &str = "message_unacknowledged";

/// `attr` value for the cumulative publish count.
pub const MESSAGE_PUBLISH: &str = "message_publish";
