//! Monitor document: brokers and the queues probed on each of them.
//!
//! ```yaml
//! - apiurl: http://127.0.0.1:15672
//!   user: guest
//!   passwd: ${MQ_PASSWORD:-guest}
//!   vhost: /
//!   monitor:
//!     orders:
//!       queue: orders.q
//!       desc: order queue
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, expand_env_vars, validate_metric_name};

/// Metric name prefix reserved for the exporter's own metrics.
pub const RESERVED_PREFIX: &str = "mq_exporter_";

fn default_vhost() -> String {
    "/".to_string()
}

/// Connection details for one broker management API.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSource {
    /// Management API base URL, e.g. `http://127.0.0.1:15672`.
    #[serde(rename = "apiurl", alias = "api_url")]
    pub api_url: String,
    /// Management API user.
    #[serde(default)]
    pub user: String,
    /// Management API password.
    #[serde(rename = "passwd", alias = "password", default)]
    pub password: String,
    /// Virtual host holding the monitored queues (default: "/").
    #[serde(default = "default_vhost")]
    pub vhost: String,
}

impl BrokerSource {
    /// Create a broker source with the default vhost and no credentials.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            user: String::new(),
            password: String::new(),
            vhost: default_vhost(),
        }
    }

    /// Set the credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the virtual host.
    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = vhost.into();
        self
    }
}

impl std::fmt::Debug for BrokerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSource")
            .field("api_url", &self.api_url)
            .field("user", &self.user)
            .field("password", &"***")
            .field("vhost", &self.vhost)
            .finish()
    }
}

/// One monitored queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSpec {
    /// Queue name on the broker.
    pub queue: String,
    /// Human-readable description, used as help text and `desc` label.
    #[serde(rename = "desc", alias = "description", default)]
    pub description: String,
}

impl MonitorSpec {
    pub fn new(queue: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            description: description.into(),
        }
    }
}

/// A broker together with the queues monitored on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerEntry {
    #[serde(flatten)]
    pub source: BrokerSource,
    /// Metric key -> monitored queue.
    #[serde(default)]
    pub monitor: BTreeMap<String, MonitorSpec>,
}

/// The reloadable monitor document: an ordered list of brokers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorConfig {
    pub brokers: Vec<BrokerEntry>,
}

impl MonitorConfig {
    /// Parse and validate raw document bytes.
    ///
    /// Environment references (`${VAR}`, `${VAR:-default}`) are expanded
    /// before parsing. A blank document yields an empty configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::ParseError` for malformed YAML and
    /// `ConfigError::ValidationError` for missing or invalid fields.
    pub fn parse(raw: &[u8]) -> Result<Self, ConfigError> {
        let text = std::str::from_utf8(raw).map_err(|e| {
            ConfigError::ValidationError(format!("config is not valid UTF-8: {}", e))
        })?;
        let text = expand_env_vars(text);
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Add a broker with its monitored queues.
    pub fn with_broker(
        mut self,
        source: BrokerSource,
        monitor: impl IntoIterator<Item = (String, MonitorSpec)>,
    ) -> Self {
        self.brokers.push(BrokerEntry {
            source,
            monitor: monitor.into_iter().collect(),
        });
        self
    }

    /// Validate all brokers and monitor entries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, broker) in self.brokers.iter().enumerate() {
            if broker.source.api_url.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "broker #{}: apiurl cannot be empty",
                    index + 1
                )));
            }

            for (key, spec) in &broker.monitor {
                validate_metric_name(key).map_err(|e| {
                    ConfigError::ValidationError(format!("broker #{}: {}", index + 1, e))
                })?;
                if key.starts_with(RESERVED_PREFIX) {
                    return Err(ConfigError::ValidationError(format!(
                        "metric key '{}' uses the reserved prefix '{}'",
                        key, RESERVED_PREFIX
                    )));
                }
                if spec.queue.trim().is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "metric key '{}': queue cannot be empty",
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    /// Iterate every (broker, metric key, monitor) triple in document order.
    pub fn monitors(&self) -> impl Iterator<Item = (&BrokerSource, &str, &MonitorSpec)> {
        self.brokers.iter().flat_map(|broker| {
            broker
                .monitor
                .iter()
                .map(move |(key, spec)| (&broker.source, key.as_str(), spec))
        })
    }
}
