//! Immutable task registry and its atomically swapped handle.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::TaskDescriptor;
use crate::config::{BrokerSource, ConfigError, MonitorConfig, MonitorSpec};
use crate::metrics::{GaugeRegistry, MetricsError, PreparedGauge, RegistryChanges, gauge_help};

/// Errors raised while building a registry.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Every poll task of one configuration, keyed by metric key.
///
/// Built in full from a configuration and never modified once published.
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<TaskDescriptor>>,
    pending: HashMap<String, PreparedGauge>,
    generation: u64,
}

impl TaskRegistry {
    /// A registry with no tasks.
    pub fn empty() -> Self {
        Self {
            tasks: HashMap::new(),
            pending: HashMap::new(),
            generation: 0,
        }
    }

    /// Build a registry from `config`.
    ///
    /// One task is produced per metric key; when a key appears more than once
    /// the later entry wins. Gauges are prepared but not exposed until
    /// [`TaskRegistry::activate`], so a failed build leaves the exposed
    /// metrics untouched. Broker reachability is not checked here.
    ///
    /// # Errors
    /// Returns `BuildError::Config` for an invalid configuration and
    /// `BuildError::Metrics` if a gauge descriptor is rejected.
    pub fn build(
        config: &MonitorConfig,
        gauges: &GaugeRegistry,
        generation: u64,
    ) -> Result<Self, BuildError> {
        config.validate()?;

        let mut selected: HashMap<&str, (&BrokerSource, &MonitorSpec)> = HashMap::new();
        for (source, key, spec) in config.monitors() {
            if let Some((previous, _)) = selected.insert(key, (source, spec)) {
                tracing::debug!(
                    metric = %key,
                    previous = %previous.api_url,
                    current = %source.api_url,
                    "Duplicate metric key, later entry wins"
                );
            }
        }

        let mut tasks = HashMap::with_capacity(selected.len());
        let mut pending = HashMap::new();
        for (key, (source, spec)) in selected {
            let help = gauge_help(key, &spec.description);
            let prepared = gauges.prepare(key, &help)?;

            let task = TaskDescriptor::new(
                key,
                source.clone(),
                spec.queue.clone(),
                spec.description.clone(),
                prepared.gauge.clone(),
            );
            tasks.insert(key.to_string(), Arc::new(task));
            pending.insert(key.to_string(), prepared);
        }

        Ok(Self {
            tasks,
            pending,
            generation,
        })
    }

    /// Expose this registry's gauges, replacing the previously exposed set.
    ///
    /// Gauges whose key is no longer present stop being exposed right away.
    /// Until this registry is published, sweeps still running on the previous
    /// snapshot may write into those gauges; the values are dropped with them.
    ///
    /// # Errors
    /// Returns `MetricsError` if a gauge cannot be registered. The exposed
    /// metrics are unchanged and this registry must not be published.
    pub fn activate(&mut self, gauges: &GaugeRegistry) -> Result<RegistryChanges, MetricsError> {
        let changes = gauges.commit(&self.pending)?;
        self.pending.clear();
        Ok(changes)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Reload generation this registry was built for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, key: &str) -> Option<&Arc<TaskDescriptor>> {
        self.tasks.get(key)
    }

    /// Metric keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.tasks.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// All tasks, in no particular order.
    pub fn tasks(&self) -> impl Iterator<Item = &Arc<TaskDescriptor>> {
        self.tasks.values()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("generation", &self.generation)
            .field("keys", &self.keys())
            .finish_non_exhaustive()
    }
}

/// Handle to the live registry, shared by the scheduler and reload paths.
///
/// Readers take a snapshot without locking; a publish replaces the whole
/// registry in one pointer swap, so a sweep sees either the old or the new
/// task set, never a mix.
#[derive(Clone)]
pub struct SharedRegistry {
    inner: Arc<ArcSwap<TaskRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(registry)),
        }
    }

    /// Current registry.
    pub fn snapshot(&self) -> Arc<TaskRegistry> {
        self.inner.load_full()
    }

    /// Replace the live registry, returning the previous one.
    pub fn publish(&self, registry: TaskRegistry) -> Arc<TaskRegistry> {
        self.inner.swap(Arc::new(registry))
    }
}

impl Default for SharedRegistry {
    fn default() -> Self {
        Self::new(TaskRegistry::empty())
    }
}

impl std::fmt::Debug for SharedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("SharedRegistry")
            .field("generation", &snapshot.generation())
            .field("task_count", &snapshot.len())
            .finish()
    }
}
