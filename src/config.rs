//! Configuration module for the exporter.
//!
//! Two layers of configuration exist:
//! - [`Settings`]: process-wide settings (listen address, pool shape, tick
//!   cadence, secret). Fixed for the lifetime of the process.
//! - [`MonitorConfig`]: the reloadable monitor document listing brokers and the
//!   queues to probe on each of them. Loaded through a [`ConfigSource`].

mod app;
mod monitor;
mod source;
mod validation;

pub use app::{
    DEFAULT_CONSUL_PREFIX, DEFAULT_INTERVAL, DEFAULT_LISTEN_ADDR, DEFAULT_QUEUE_LENGTH,
    DEFAULT_QUEUE_NUMBER, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SUBMIT_TIMEOUT, DEFAULT_WORKERS,
    Settings, parse_listen_addr,
};
pub use monitor::{BrokerSource, MonitorConfig, MonitorSpec, RESERVED_PREFIX};
pub use source::{ConfigSource, ConsulSource, FileSource};
pub use validation::{ConfigError, expand_env_vars, parse_duration, validate_metric_name};
