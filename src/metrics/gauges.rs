//! Per-key gauge registration and text exposition.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use thiserror::Error;

use super::exporter::ExporterMetrics;
use super::{ATTR_LABEL, DESC_LABEL};

/// Errors raised by the metrics layer.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Prometheus rejected a descriptor or registration.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Exposition output could not be produced.
    #[error("failed to encode metrics: {0}")]
    Encode(String),
}

/// Help text for a metric key. Empty help is not accepted by the exposition
/// format, so the key stands in for a missing description.
pub fn gauge_help(key: &str, description: &str) -> String {
    if description.trim().is_empty() {
        key.to_string()
    } else {
        description.to_string()
    }
}

/// A gauge ready to back one task.
///
/// `fresh` gauges are new in this reload; reused ones keep the series of the
/// gauge already exposed under the same name.
#[derive(Clone)]
pub struct PreparedGauge {
    pub gauge: GaugeVec,
    pub help: String,
    pub fresh: bool,
}

impl std::fmt::Debug for PreparedGauge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedGauge")
            .field("help", &self.help)
            .field("fresh", &self.fresh)
            .finish_non_exhaustive()
    }
}

/// Gauge registration changes applied by [`GaugeRegistry::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryChanges {
    /// Keys whose gauge was newly registered or replaced.
    pub registered: Vec<String>,
    /// Keys whose gauge was unregistered.
    pub removed: Vec<String>,
    /// Keys that kept their existing gauge.
    pub retained: Vec<String>,
}

struct GaugeEntry {
    gauge: GaugeVec,
    help: String,
}

/// Registry of queue gauges keyed by metric name.
///
/// Every commit builds a new Prometheus registry holding the self-metrics and
/// the complete gauge set, then swaps it in. A descriptor whose help changed
/// never meets the old one, and a failed commit leaves the exposed registry
/// untouched. Commits are expected to be serialized by the caller's reload
/// lock.
pub struct GaugeRegistry {
    registry: ArcSwap<Registry>,
    gauges: Mutex<HashMap<String, GaugeEntry>>,
    exporter: ExporterMetrics,
}

impl GaugeRegistry {
    /// Create a registry with the exporter self-metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let exporter = ExporterMetrics::new()?;
        let registry = Registry::new();
        exporter.register(&registry)?;

        Ok(Self {
            registry: ArcSwap::from_pointee(registry),
            gauges: Mutex::new(HashMap::new()),
            exporter,
        })
    }

    /// The Prometheus registry currently exposed.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.load_full()
    }

    /// Exporter self-metrics.
    pub fn exporter(&self) -> &ExporterMetrics {
        &self.exporter
    }

    /// Prepare a gauge for `name`.
    ///
    /// Reuses the exposed gauge when its help text is unchanged, so the series
    /// keeps its last values across a reload. Otherwise builds a new one which
    /// is not yet visible.
    ///
    /// # Errors
    /// Returns `MetricsError::Prometheus` if the name or help is rejected.
    pub fn prepare(&self, name: &str, help: &str) -> Result<PreparedGauge, MetricsError> {
        if let Some(entry) = self.gauges.lock().get(name) {
            if entry.help == help {
                return Ok(PreparedGauge {
                    gauge: entry.gauge.clone(),
                    help: entry.help.clone(),
                    fresh: false,
                });
            }
        }

        let gauge = GaugeVec::new(Opts::new(name, help), &[ATTR_LABEL, DESC_LABEL])?;
        Ok(PreparedGauge {
            gauge,
            help: help.to_string(),
            fresh: true,
        })
    }

    /// Expose exactly `gauges`, replacing the whole exposed set.
    ///
    /// Names absent from `gauges` stop being exposed.
    ///
    /// # Errors
    /// Returns `MetricsError::Prometheus` if any gauge cannot be registered.
    /// Nothing exposed changes in that case.
    pub fn commit(
        &self,
        gauges: &HashMap<String, PreparedGauge>,
    ) -> Result<RegistryChanges, MetricsError> {
        let next = Registry::new();
        self.exporter.register(&next)?;
        for prepared in gauges.values() {
            next.register(Box::new(prepared.gauge.clone()))?;
        }

        let mut current = self.gauges.lock();
        let mut changes = RegistryChanges::default();
        for (name, prepared) in gauges {
            if prepared.fresh || !current.contains_key(name) {
                changes.registered.push(name.clone());
            } else {
                changes.retained.push(name.clone());
            }
        }
        changes.removed = current
            .keys()
            .filter(|name| !gauges.contains_key(*name))
            .cloned()
            .collect();

        *current = gauges
            .iter()
            .map(|(name, prepared)| {
                (
                    name.clone(),
                    GaugeEntry {
                        gauge: prepared.gauge.clone(),
                        help: prepared.help.clone(),
                    },
                )
            })
            .collect();
        self.registry.store(Arc::new(next));
        drop(current);

        changes.registered.sort();
        changes.removed.sort();
        changes.retained.sort();
        Ok(changes)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.gauges.lock().contains_key(name)
    }

    /// Names of all exposed queue gauges, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.gauges.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Render every registered metric in the text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.load().gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encode(e.to_string()))
    }
}

impl std::fmt::Debug for GaugeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaugeRegistry")
            .field("gauge_count", &self.gauges.lock().len())
            .finish_non_exhaustive()
    }
}
