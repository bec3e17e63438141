//! HTTP surface of the exporter.
//!
//! Serves the Prometheus exposition and the guarded `/reload` and `/exit`
//! actions, plus liveness, readiness and status probes.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Notify;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::auth::{ActionGuard, AuthError};
use crate::metrics::GaugeRegistry;
use crate::reload::{ReloadCoordinator, ReloadState};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub reloader: Arc<ReloadCoordinator>,
    pub gauges: Arc<GaugeRegistry>,
    pub guard: ActionGuard,
    /// Notified once when `/exit` is accepted.
    pub shutdown: Arc<Notify>,
}

/// Query parameters of the guarded actions.
#[derive(Debug, Default, Deserialize)]
pub struct ActionParams {
    pub code: Option<String>,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation: Option<u64>,
}

/// Status response.
#[derive(Debug, Serialize)]
struct StatusResponse {
    tasks: usize,
    generation: u64,
    last_reload: Option<DateTime<Utc>>,
    state: ReloadState,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/reload", get(reload_handler).post(reload_handler))
        .route("/exit", get(exit_handler).post(exit_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/status", get(status_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .with_state(app_state)
}

/// Prometheus text exposition of every registered gauge.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.gauges.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Metrics render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e)).into_response()
        }
    }
}

async fn reload_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActionParams>,
) -> Response {
    if let Err(e) = state.guard.authorize(params.code.as_deref()) {
        return unauthorized("reload", e);
    }

    match state.reloader.reload().await {
        Ok(outcome) => (
            StatusCode::OK,
            format!("reload config success\n{}\n", outcome),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("reload config failed: {}\n", e),
        )
            .into_response(),
    }
}

async fn exit_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActionParams>,
) -> Response {
    if let Err(e) = state.guard.authorize(params.code.as_deref()) {
        return unauthorized("exit", e);
    }

    tracing::info!("Exit requested over HTTP");
    state.shutdown.notify_one();
    (StatusCode::OK, "bye bye!\n").into_response()
}

fn unauthorized(action: &str, err: AuthError) -> Response {
    tracing::warn!(action, error = %err, "Action rejected");
    let status = match err {
        AuthError::MissingCode | AuthError::InvalidCode => StatusCode::UNAUTHORIZED,
        AuthError::Verifier(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, format!("{}\n", err)).into_response()
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        generation: None,
    })
}

/// Readiness probe: ready once a configuration has been loaded.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    let generation = state.reloader.generation();
    if generation > 0 {
        Json(HealthResponse {
            status: "ok".to_string(),
            generation: Some(generation),
        })
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "not_ready".to_string(),
                generation: Some(generation),
            }),
        )
            .into_response()
    }
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let snapshot = state.reloader.registry().snapshot();
    Json(StatusResponse {
        tasks: snapshot.len(),
        generation: state.reloader.generation(),
        last_reload: state.reloader.last_success(),
        state: state.reloader.state(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CodeVerifier;
    use crate::config::{ConfigError, ConfigSource};
    use crate::task::SharedRegistry;
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    struct StaticSource(&'static str);

    #[async_trait::async_trait]
    impl ConfigSource for StaticSource {
        fn describe(&self) -> String {
            "static".to_string()
        }

        async fn load(&self) -> Result<Vec<u8>, ConfigError> {
            Ok(self.0.as_bytes().to_vec())
        }
    }

    struct FixedVerifier;

    impl CodeVerifier for FixedVerifier {
        fn verify(&self, code: &str) -> Result<bool, AuthError> {
            Ok(code == "424242")
        }
    }

    const DOCUMENT: &str = "- apiurl: http://mq\n  monitor:\n    orders:\n      queue: Q1\n      desc: order queue\n";

    fn create_test_state(document: &'static str, guard: ActionGuard) -> AppState {
        let gauges = Arc::new(GaugeRegistry::new().unwrap());
        let reloader = Arc::new(ReloadCoordinator::new(
            Arc::new(StaticSource(document)),
            Arc::clone(&gauges),
            SharedRegistry::default(),
        ));
        AppState {
            reloader,
            gauges,
            guard,
            shutdown: Arc::new(Notify::new()),
        }
    }

    async fn send(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    #[tokio::test]
    async fn test_reload_without_secret() {
        let state = create_test_state(DOCUMENT, ActionGuard::open());
        let app = create_router(state.clone());

        let (status, body) = send(app.clone(), "/reload").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("reload config success"));
        assert_eq!(state.reloader.generation(), 1);
        assert_eq!(state.gauges.names(), vec!["orders"]);

        let (status, body) = send(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("mq_exporter_reloads_total{result=\"success\"} 1"));
        assert!(body.contains("mq_exporter_tasks 1"));
    }

    #[tokio::test]
    async fn test_reload_requires_valid_code() {
        let guard = ActionGuard::new(Arc::new(FixedVerifier));
        let state = create_test_state(DOCUMENT, guard);
        let app = create_router(state.clone());

        let (status, _) = send(app.clone(), "/reload").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(app.clone(), "/reload?code=111111").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(state.reloader.generation(), 0);

        let (status, _) = send(app, "/reload?code=424242").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.reloader.generation(), 1);
    }

    #[tokio::test]
    async fn test_reload_failure_is_reported() {
        let state = create_test_state("- apiurl: [broken", ActionGuard::open());
        let app = create_router(state.clone());

        let (status, body) = send(app, "/reload").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("reload config failed"));
        assert_eq!(state.reloader.generation(), 0);
    }

    #[tokio::test]
    async fn test_exit_notifies_shutdown() {
        let guard = ActionGuard::new(Arc::new(FixedVerifier));
        let state = create_test_state(DOCUMENT, guard);
        let app = create_router(state.clone());

        let (status, _) = send(app.clone(), "/exit?code=000000").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(app, "/exit?code=424242").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.trim(), "bye bye!");

        // notify_one stores a permit, so a late waiter still wakes.
        tokio::time::timeout(std::time::Duration::from_secs(1), state.shutdown.notified())
            .await
            .expect("shutdown was not signalled");
    }

    #[tokio::test]
    async fn test_probes_and_status() {
        let state = create_test_state(DOCUMENT, ActionGuard::open());
        let app = create_router(state.clone());

        let (status, body) = send(app.clone(), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"ok\""));

        let (status, _) = send(app.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.reloader.reload().await.unwrap();

        let (status, _) = send(app.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(app, "/status").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["tasks"], 1);
        assert_eq!(json["generation"], 1);
        assert_eq!(json["state"], "idle");
        assert!(json["last_reload"].is_string());
    }
}
