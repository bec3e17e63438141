//! Reload coordination.
//!
//! A reload reads the monitor document from its [`ConfigSource`], builds a
//! complete replacement [`TaskRegistry`], reconciles gauge registrations and
//! publishes the new registry in one swap. Reloads are serialized; a failed
//! reload leaves the live registry and the exposed gauges as they were.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::{ConfigError, ConfigSource, MonitorConfig};
use crate::metrics::{GaugeRegistry, MetricsError};
use crate::task::{BuildError, SharedRegistry, TaskRegistry};

/// Errors that abort a reload.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// The source could not be read.
    #[error("config read failed: {0}")]
    Read(#[source] ConfigError),

    /// The document is malformed or invalid.
    #[error("config parse failed: {0}")]
    Parse(#[source] ConfigError),

    /// A gauge could not be prepared or exposed.
    #[error("metric setup failed: {0}")]
    Metrics(#[from] MetricsError),
}

impl From<BuildError> for ReloadError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Config(e) => Self::Parse(e),
            BuildError::Metrics(e) => Self::Metrics(e),
        }
    }
}

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadState {
    Idle,
    Reloading,
}

/// Summary of a successful reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadOutcome {
    pub generation: u64,
    pub tasks: usize,
    pub registered: Vec<String>,
    pub removed: Vec<String>,
    pub retained: Vec<String>,
}

impl std::fmt::Display for ReloadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "generation {}: {} tasks ({} registered, {} removed, {} retained)",
            self.generation,
            self.tasks,
            self.registered.len(),
            self.removed.len(),
            self.retained.len()
        )
    }
}

/// Rebuilds and swaps the live task registry.
pub struct ReloadCoordinator {
    source: Arc<dyn ConfigSource>,
    gauges: Arc<GaugeRegistry>,
    registry: SharedRegistry,
    lock: Mutex<()>,
    reloading: AtomicBool,
    generation: AtomicU64,
    last_success: RwLock<Option<DateTime<Utc>>>,
}

impl ReloadCoordinator {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        gauges: Arc<GaugeRegistry>,
        registry: SharedRegistry,
    ) -> Self {
        let generation = registry.snapshot().generation();
        Self {
            source,
            gauges,
            registry,
            lock: Mutex::new(()),
            reloading: AtomicBool::new(false),
            generation: AtomicU64::new(generation),
            last_success: RwLock::new(None),
        }
    }

    /// Handle to the registry this coordinator publishes into.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn state(&self) -> ReloadState {
        if self.reloading.load(Ordering::Acquire) {
            ReloadState::Reloading
        } else {
            ReloadState::Idle
        }
    }

    /// Generation of the last published registry.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Time of the last successful reload.
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.read()
    }

    /// Reload the configuration and publish a new registry.
    ///
    /// Concurrent calls wait for each other and run one after another.
    ///
    /// # Errors
    /// `ReloadError::Read` or `ReloadError::Parse` when the document cannot be
    /// loaded, `ReloadError::Metrics` when a gauge is rejected. In every error
    /// case the live registry and exposed gauges are unchanged.
    pub async fn reload(&self) -> Result<ReloadOutcome, ReloadError> {
        let _guard = self.lock.lock().await;
        let result = {
            let _flag = ReloadingFlag::raise(&self.reloading);
            self.reload_locked().await
        };

        let exporter = self.gauges.exporter();
        match &result {
            Ok(outcome) => {
                exporter.record_reload(true);
                exporter.set_tasks(outcome.tasks);
                *self.last_success.write() = Some(Utc::now());
                tracing::info!(
                    source = %self.source.describe(),
                    generation = outcome.generation,
                    tasks = outcome.tasks,
                    registered = outcome.registered.len(),
                    removed = outcome.removed.len(),
                    "Config reloaded"
                );
            }
            Err(e) => {
                exporter.record_reload(false);
                tracing::warn!(
                    source = %self.source.describe(),
                    error = %e,
                    "Config reload failed, keeping current tasks"
                );
            }
        }
        result
    }

    async fn reload_locked(&self) -> Result<ReloadOutcome, ReloadError> {
        tracing::info!(source = %self.source.describe(), "Reloading config");

        let raw = self.source.load().await.map_err(classify)?;
        let config = MonitorConfig::parse(&raw).map_err(classify)?;

        let generation = self.generation() + 1;
        let mut next = TaskRegistry::build(&config, &self.gauges, generation)?;
        let changes = next.activate(&self.gauges)?;
        let tasks = next.len();

        self.registry.publish(next);
        self.generation.store(generation, Ordering::Release);

        Ok(ReloadOutcome {
            generation,
            tasks,
            registered: changes.registered,
            removed: changes.removed,
            retained: changes.retained,
        })
    }
}

impl std::fmt::Debug for ReloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadCoordinator")
            .field("source", &self.source.describe())
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

/// Marks a reload in progress; cleared on drop so a cancelled reload does
/// not leave the state stuck.
struct ReloadingFlag<'a>(&'a AtomicBool);

impl<'a> ReloadingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for ReloadingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn classify(err: ConfigError) -> ReloadError {
    if err.is_read_error() {
        ReloadError::Read(err)
    } else {
        ReloadError::Parse(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::metrics::MESSAGE_READY;

    /// In-memory source whose document can be swapped between reloads.
    #[derive(Default)]
    struct MemorySource {
        document: parking_lot::Mutex<Option<String>>,
        delay: Option<Duration>,
    }

    impl MemorySource {
        fn set(&self, document: Option<&str>) {
            *self.document.lock() = document.map(str::to_string);
        }
    }

    #[async_trait::async_trait]
    impl ConfigSource for MemorySource {
        fn describe(&self) -> String {
            "memory".to_string()
        }

        async fn load(&self) -> Result<Vec<u8>, ConfigError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.document
                .lock()
                .clone()
                .map(String::into_bytes)
                .ok_or_else(|| ConfigError::RemoteError("store unreachable".to_string()))
        }
    }

    const TWO_QUEUES: &str = r#"
- apiurl: http://mq
  monitor:
    orders:
      queue: Q1
      desc: order queue
    emails:
      queue: mail
      desc: email queue
"#;

    fn coordinator(source: Arc<MemorySource>) -> (ReloadCoordinator, Arc<GaugeRegistry>) {
        let gauges = Arc::new(GaugeRegistry::new().unwrap());
        let coordinator =
            ReloadCoordinator::new(source, Arc::clone(&gauges), SharedRegistry::default());
        (coordinator, gauges)
    }

    #[tokio::test]
    async fn test_reload_publishes_registry() {
        let source = Arc::new(MemorySource::default());
        source.set(Some(TWO_QUEUES));
        let (coordinator, gauges) = coordinator(source);

        assert_eq!(coordinator.state(), ReloadState::Idle);
        assert!(coordinator.last_success().is_none());

        let outcome = coordinator.reload().await.unwrap();
        assert_eq!(outcome.generation, 1);
        assert_eq!(outcome.tasks, 2);
        assert_eq!(outcome.registered, vec!["emails", "orders"]);

        let snapshot = coordinator.registry().snapshot();
        assert_eq!(snapshot.keys(), vec!["emails", "orders"]);
        assert_eq!(gauges.names(), vec!["emails", "orders"]);
        assert_eq!(gauges.exporter().tasks.get(), 2);
        assert!(coordinator.last_success().is_some());
        assert_eq!(coordinator.state(), ReloadState::Idle);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_state() {
        let source = Arc::new(MemorySource::default());
        source.set(Some(TWO_QUEUES));
        let (coordinator, gauges) = coordinator(Arc::clone(&source));
        coordinator.reload().await.unwrap();

        let orders = coordinator.registry().snapshot().get("orders").unwrap().gauge().clone();
        orders.with_label_values(&[MESSAGE_READY, "order queue"]).set(5.0);
        let rendered = gauges.render().unwrap();
        let before = coordinator.registry().snapshot();

        source.set(Some("- apiurl: [broken"));
        let err = coordinator.reload().await.unwrap_err();
        assert!(matches!(err, ReloadError::Parse(_)));

        source.set(None);
        let err = coordinator.reload().await.unwrap_err();
        assert!(matches!(err, ReloadError::Read(_)));

        source.set(Some("- apiurl: http://mq\n  monitor:\n    bad-key:\n      queue: q\n"));
        assert!(matches!(
            coordinator.reload().await,
            Err(ReloadError::Parse(_))
        ));

        let after = coordinator.registry().snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(coordinator.generation(), 1);
        assert_eq!(gauges.names(), vec!["emails", "orders"]);

        let failures = gauges.exporter().reloads_total.with_label_values(&["failure"]);
        assert_eq!(failures.get(), 3);

        // Apart from the reload counter, exposition is untouched.
        let without_reloads = |text: &str| -> Vec<String> {
            text.lines()
                .filter(|line| !line.contains("mq_exporter_reloads_total"))
                .map(str::to_string)
                .collect()
        };
        assert_eq!(
            without_reloads(&gauges.render().unwrap()),
            without_reloads(&rendered)
        );
    }

    #[tokio::test]
    async fn test_removed_key_is_unregistered() {
        let source = Arc::new(MemorySource::default());
        source.set(Some(TWO_QUEUES));
        let (coordinator, gauges) = coordinator(Arc::clone(&source));
        coordinator.reload().await.unwrap();

        let emails = coordinator.registry().snapshot().get("emails").unwrap().gauge().clone();
        emails.with_label_values(&[MESSAGE_READY, "email queue"]).set(1.0);
        assert!(gauges.render().unwrap().contains("emails{"));

        source.set(Some(
            "- apiurl: http://mq\n  monitor:\n    orders:\n      queue: Q2\n      desc: order queue\n",
        ));
        let outcome = coordinator.reload().await.unwrap();
        assert_eq!(outcome.removed, vec!["emails"]);
        assert_eq!(outcome.retained, vec!["orders"]);
        assert_eq!(outcome.generation, 2);

        assert!(!gauges.render().unwrap().contains("emails"));
        let orders = coordinator.registry().snapshot().get("orders").cloned().unwrap();
        assert_eq!(orders.queue(), "Q2");
    }

    #[tokio::test]
    async fn test_changed_desc_keeps_gauge_exposed() {
        let source = Arc::new(MemorySource::default());
        source.set(Some(TWO_QUEUES));
        let (coordinator, gauges) = coordinator(Arc::clone(&source));
        coordinator.reload().await.unwrap();

        let renamed = TWO_QUEUES.replace("desc: order queue", "desc: orders v2");
        source.set(Some(renamed.as_str()));
        let outcome = coordinator.reload().await.unwrap();
        assert_eq!(outcome.registered, vec!["orders"]);
        assert_eq!(outcome.retained, vec!["emails"]);
        assert_eq!(gauges.names(), vec!["emails", "orders"]);

        let orders = coordinator.registry().snapshot().get("orders").cloned().unwrap();
        assert_eq!(orders.description(), "orders v2");
        orders
            .gauge()
            .with_label_values(&[MESSAGE_READY, "orders v2"])
            .set(3.0);

        let output = gauges.render().unwrap();
        assert!(output.contains("# HELP orders orders v2"));
        assert!(output.contains(r#"orders{attr="message_ready",desc="orders v2"} 3"#));
        assert!(!output.contains("order queue"));
    }

    #[tokio::test]
    async fn test_concurrent_reloads_are_serialized() {
        let source = Arc::new(MemorySource {
            delay: Some(Duration::from_millis(50)),
            ..MemorySource::default()
        });
        source.set(Some(TWO_QUEUES));
        let (coordinator, _gauges) = coordinator(source);
        let coordinator = Arc::new(coordinator);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move { coordinator.reload().await.unwrap().generation })
            })
            .collect();

        let mut generations = Vec::new();
        for handle in handles {
            generations.push(handle.await.unwrap());
        }
        generations.sort();
        assert_eq!(generations, vec![1, 2, 3, 4]);
        assert_eq!(coordinator.generation(), 4);
    }

    #[tokio::test]
    async fn test_state_is_reloading_while_loading() {
        let source = Arc::new(MemorySource {
            delay: Some(Duration::from_millis(200)),
            ..MemorySource::default()
        });
        source.set(Some(TWO_QUEUES));
        let (coordinator, _gauges) = coordinator(source);
        let coordinator = Arc::new(coordinator);

        let running = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.reload().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.state(), ReloadState::Reloading);

        running.await.unwrap().unwrap();
        assert_eq!(coordinator.state(), ReloadState::Idle);
    }
}
