//! Configuration validation utilities.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to reach the remote key-value store.
    #[error("failed to read remote config: {0}")]
    RemoteError(String),

    /// The remote store holds no pairs under the configured prefix.
    #[error("no config found under '{prefix}' at {addr}")]
    EmptyRemote { addr: String, prefix: String },

    /// Failed to parse the YAML document.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    /// True when the source could not be read at all, as opposed to
    /// returning a document that turned out to be malformed.
    pub fn is_read_error(&self) -> bool {
        matches!(
            self,
            Self::IoError(_) | Self::RemoteError(_) | Self::EmptyRemote { .. }
        )
    }
}

/// Parse duration string using humantime.
///
/// Supports formats such as `30s`, `1m`, `5m30s`, `100ms`.
///
/// # Examples
///
/// ```
/// use mq_exporter::config::parse_duration;
///
/// assert_eq!(parse_duration("5s").unwrap().as_secs(), 5);
/// assert_eq!(parse_duration("1m").unwrap().as_secs(), 60);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: OnceLock<Regex> = OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

/// Check that `name` is usable as a Prometheus metric name.
pub fn validate_metric_name(name: &str) -> Result<(), String> {
    static METRIC_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

    let regex = METRIC_NAME_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("failed to compile metric name regex")
    });

    if name.is_empty() {
        return Err("metric name cannot be empty".to_string());
    }
    if !regex.is_match(name) {
        return Err(format!("'{}' is not a valid metric name", name));
    }
    Ok(())
}
