//! HTTP client for the broker management API.
//!
//! Reads `GET {apiurl}/api/queues/{vhost}/{queue}` with basic auth.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use super::{BrokerError, QueueStats, QueueStatsFetcher};
use crate::config::BrokerSource;

/// Queue object as returned by the management API. Counters are omitted by
/// the broker while a queue has seen no traffic, so every field defaults.
#[derive(Debug, Default, Deserialize)]
struct QueueInfo {
    #[serde(default)]
    messages_ready: u64,
    #[serde(default)]
    messages_unacknowledged: u64,
    #[serde(default)]
    message_stats: Option<MessageStats>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageStats {
    #[serde(default)]
    publish: u64,
}

impl From<QueueInfo> for QueueStats {
    fn from(info: QueueInfo) -> Self {
        Self {
            messages_ready: info.messages_ready,
            messages_unacknowledged: info.messages_unacknowledged,
            publish: info.message_stats.map(|s| s.publish).unwrap_or(0),
        }
    }
}

/// Management API client shared by every poll task.
#[derive(Debug, Clone)]
pub struct ManagementClient {
    client: Client,
}

impl ManagementClient {
    /// Create a client whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    fn queue_url(source: &BrokerSource, queue: &str) -> Result<String, BrokerError> {
        let base = source.api_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(BrokerError::InvalidSource("empty apiurl".to_string()));
        }
        Ok(format!(
            "{}/api/queues/{}/{}",
            base,
            urlencoding::encode(&source.vhost),
            urlencoding::encode(queue)
        ))
    }
}

#[async_trait::async_trait]
impl QueueStatsFetcher for ManagementClient {
    async fn fetch_queue_stats(
        &self,
        source: &BrokerSource,
        queue: &str,
    ) -> Result<QueueStats, BrokerError> {
        let url = Self::queue_url(source, queue)?;
        let response = self
            .client
            .get(&url)
            .basic_auth(&source.user, Some(&source.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BrokerError::Status {
                status,
                queue: queue.to_string(),
            });
        }

        let body = response.bytes().await?;
        let info: QueueInfo =
            serde_json::from_slice(&body).map_err(|e| BrokerError::Decode(e.to_string()))?;
        Ok(info.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::Router;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use base64::Engine;
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn start_mock_broker() -> String {
        let router = Router::new().route(
            "/api/queues/{vhost}/{queue}",
            get(
                |Path((vhost, queue)): Path<(String, String)>, headers: HeaderMap| async move {
                    let expected = format!(
                        "Basic {}",
                        base64::engine::general_purpose::STANDARD.encode("guest:guest")
                    );
                    let authorized = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        == Some(expected.as_str());
                    let response: Response = match (authorized, vhost.as_str(), queue.as_str()) {
                        (false, _, _) => StatusCode::UNAUTHORIZED.into_response(),
                        (true, "/", "orders") => axum::Json(json!({
                            "name": "orders",
                            "messages_ready": 5,
                            "messages_unacknowledged": 2,
                            "message_stats": { "publish": 100, "publish_details": { "rate": 0.0 } }
                        }))
                        .into_response(),
                        (true, "/", "idle") => axum::Json(json!({ "name": "idle" })).into_response(),
                        (true, "/", "broken") => "not json".into_response(),
                        (true, "staging", "a b") => {
                            axum::Json(json!({ "messages_ready": 1 })).into_response()
                        }
                        _ => StatusCode::NOT_FOUND.into_response(),
                    };
                    response
                },
            ),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client() -> ManagementClient {
        ManagementClient::new(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_queue_url_encodes_vhost_and_queue() {
        let source = BrokerSource::new("http://mq:15672/");
        assert_eq!(
            ManagementClient::queue_url(&source, "orders").unwrap(),
            "http://mq:15672/api/queues/%2F/orders"
        );

        let source = source.with_vhost("my vhost");
        assert_eq!(
            ManagementClient::queue_url(&source, "a/b").unwrap(),
            "http://mq:15672/api/queues/my%20vhost/a%2Fb"
        );

        assert!(ManagementClient::queue_url(&BrokerSource::new(" "), "q").is_err());
    }

    #[tokio::test]
    async fn test_fetch_queue_stats() {
        let base = start_mock_broker().await;
        let source = BrokerSource::new(&base).with_credentials("guest", "guest");

        let stats = client().fetch_queue_stats(&source, "orders").await.unwrap();
        assert_eq!(
            stats,
            QueueStats {
                messages_ready: 5,
                messages_unacknowledged: 2,
                publish: 100,
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_idle_queue_defaults_to_zero() {
        let base = start_mock_broker().await;
        let source = BrokerSource::new(&base).with_credentials("guest", "guest");

        let stats = client().fetch_queue_stats(&source, "idle").await.unwrap();
        assert_eq!(stats, QueueStats::default());

        let staging = source.clone().with_vhost("staging");
        let stats = client().fetch_queue_stats(&staging, "a b").await.unwrap();
        assert_eq!(stats.messages_ready, 1);
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let base = start_mock_broker().await;
        let source = BrokerSource::new(&base).with_credentials("guest", "guest");

        let err = client().fetch_queue_stats(&source, "missing").await.unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Status { status, .. } if status == reqwest::StatusCode::NOT_FOUND
        ));

        let wrong = BrokerSource::new(&base).with_credentials("guest", "nope");
        let err = client().fetch_queue_stats(&wrong, "orders").await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_fetch_invalid_body() {
        let base = start_mock_broker().await;
        let source = BrokerSource::new(&base).with_credentials("guest", "guest");

        let err = client().fetch_queue_stats(&source, "broken").await.unwrap_err();
        assert!(matches!(err, BrokerError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_broker() {
        let source = BrokerSource::new("http://127.0.0.1:1");
        let err = client().fetch_queue_stats(&source, "orders").await.unwrap_err();
        assert!(matches!(err, BrokerError::Http(_)));
    }
}
