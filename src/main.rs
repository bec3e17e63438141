//! mq-exporter Binary Entry Point
//!
//! Runs the poll scheduler, the worker pool and the HTTP server.
//! Core functionality is provided by the `mq_exporter` library crate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mq_exporter::{
    ActionGuard, ConfigSource, ConsulSource, FileSource, GaugeRegistry, ManagementClient,
    PollScheduler, ReloadCoordinator, Schedule, Settings, SharedRegistry, Sweeper, WorkerPool,
    config::{
        DEFAULT_CONSUL_PREFIX, DEFAULT_QUEUE_LENGTH, DEFAULT_QUEUE_NUMBER, DEFAULT_WORKERS,
        parse_duration, parse_listen_addr,
    },
    server::{AppState, create_router},
};
use tokio::sync::Notify;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// mq-exporter - Queue Statistics Exporter
#[derive(Parser, Debug)]
#[command(name = "mq-exporter", version, about, long_about = None)]
struct Cli {
    /// Path to the monitor document
    #[arg(
        short,
        long,
        default_value = "./config/config.yaml",
        env = "MQ_EXPORTER_CONFIG"
    )]
    config: String,

    /// Consul address; when set the monitor document is read from Consul
    #[arg(long, env = "MQ_EXPORTER_CONSUL")]
    consul: Option<String>,

    /// Key prefix listed in Consul
    #[arg(long, default_value = DEFAULT_CONSUL_PREFIX, env = "MQ_EXPORTER_CONSUL_PREFIX")]
    consul_prefix: String,

    /// Consul ACL token
    #[arg(long, env = "MQ_EXPORTER_CONSUL_TOKEN", hide_env_values = true)]
    consul_token: Option<String>,

    /// HTTP listen address (`:8082` listens on all interfaces)
    #[arg(long, default_value = ":8082", value_parser = parse_listen_addr, env = "MQ_EXPORTER_ADDR")]
    addr: SocketAddr,

    /// Base32 secret guarding /reload and /exit
    #[arg(long, env = "MQ_EXPORTER_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Poll interval (e.g. `5s`, `1m`)
    #[arg(long, default_value = "5s", value_parser = parse_duration, env = "MQ_EXPORTER_INTERVAL")]
    interval: Duration,

    /// Cron expression (6 fields, with seconds) used instead of --interval
    #[arg(long, conflicts_with = "interval", env = "MQ_EXPORTER_CRON")]
    cron: Option<String>,

    /// Number of poll workers
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "MQ_EXPORTER_WORKERS")]
    workers: usize,

    /// Number of dispatch queues
    #[arg(long, default_value_t = DEFAULT_QUEUE_NUMBER, env = "MQ_EXPORTER_QUEUES")]
    queues: usize,

    /// Buffer length of each dispatch queue
    #[arg(long, default_value_t = DEFAULT_QUEUE_LENGTH, env = "MQ_EXPORTER_QUEUE_LENGTH")]
    queue_length: usize,

    /// Time a poll may wait for room in a full dispatch queue
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    submit_timeout: Duration,

    /// Bound on each broker or Consul request
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    request_timeout: Duration,
}

impl Cli {
    fn into_settings(self) -> Result<Settings, Box<dyn std::error::Error>> {
        let schedule = match self.cron {
            Some(expr) => Schedule::cron(expr)?,
            None => Schedule::interval(self.interval),
        };

        Ok(Settings {
            config_path: self.config,
            consul_addr: self.consul.filter(|s| !s.trim().is_empty()),
            consul_prefix: self.consul_prefix,
            consul_token: self.consul_token.filter(|s| !s.trim().is_empty()),
            listen_addr: self.addr,
            secret: self.secret,
            schedule,
            workers: self.workers,
            queue_number: self.queues,
            queue_length: self.queue_length,
            submit_timeout: self.submit_timeout,
            request_timeout: self.request_timeout,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mq_exporter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let settings = Cli::parse().into_settings()?;
    settings.validate()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mq-exporter starting");
    tracing::info!(
        schedule = %settings.schedule,
        workers = settings.workers,
        queues = settings.queue_number,
        queue_length = settings.queue_length,
        "Poll settings"
    );

    let source = config_source(&settings)?;
    let guard = ActionGuard::from_secret(settings.secret.as_deref())?;
    if !guard.is_enabled() {
        tracing::warn!("No secret configured, /reload and /exit are unauthenticated");
    }

    // Build collaborators
    let gauges = Arc::new(GaugeRegistry::new()?);
    let registry = SharedRegistry::default();
    let reloader = Arc::new(ReloadCoordinator::new(
        source,
        Arc::clone(&gauges),
        registry.clone(),
    ));

    // The initial load is fatal; later reloads keep the previous tasks.
    let outcome = reloader.reload().await?;
    tracing::info!(tasks = outcome.tasks, "Initial config loaded");

    let fetcher = Arc::new(ManagementClient::new(settings.request_timeout)?);
    let pool = Arc::new(WorkerPool::new(settings.pool_config()));
    let sweeper = Sweeper::new(
        registry,
        Arc::clone(&pool),
        fetcher,
        gauges.exporter().clone(),
    );

    tracing::info!("Starting poll scheduler...");
    let scheduler = PollScheduler::new(settings.schedule.clone(), sweeper).await?;
    scheduler.start().await?;

    // Create web server state
    let shutdown = Arc::new(Notify::new());
    let app = create_router(AppState {
        reloader,
        gauges,
        guard,
        shutdown: Arc::clone(&shutdown),
    });

    let listener = match tokio::net::TcpListener::bind(settings.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %settings.listen_addr, error = %e, "Failed to bind listener");
            return Err(e.into());
        }
    };

    tracing::info!("Web server listening on: http://{}", settings.listen_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Shutting down poll scheduler...");
    if let Err(e) = scheduler.shutdown().await {
        tracing::error!("Failed to shutdown poll scheduler: {}", e);
    }

    tracing::info!("Shutting down worker pool...");
    pool.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Select where the monitor document is read from.
fn config_source(settings: &Settings) -> Result<Arc<dyn ConfigSource>, Box<dyn std::error::Error>> {
    let source: Arc<dyn ConfigSource> = match &settings.consul_addr {
        Some(addr) => {
            let mut source =
                ConsulSource::new(addr, &settings.consul_prefix, settings.request_timeout)?;
            if let Some(token) = &settings.consul_token {
                source = source.with_token(token);
            }
            Arc::new(source)
        }
        None => Arc::new(FileSource::new(&settings.config_path)),
    };
    tracing::info!(source = %source.describe(), "Config source");
    Ok(source)
}

/// Setup graceful shutdown signal handler.
async fn shutdown_signal(exit: Arc<Notify>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
        _ = exit.notified() => {
            tracing::info!("Received exit request");
        }
    }
}
