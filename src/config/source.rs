//! Sources for the raw monitor document.

use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::validation::ConfigError;

/// Header carrying the remote store ACL token.
const CONSUL_TOKEN_HEADER: &str = "X-Consul-Token";

/// Separator placed between concatenated remote values.
const PAIR_SEPARATOR: u8 = b'\n';

/// A place the monitor document can be loaded from.
#[async_trait::async_trait]
pub trait ConfigSource: Send + Sync + 'static {
    /// Short description for logs (path or address).
    fn describe(&self) -> String;

    /// Load the raw document bytes.
    async fn load(&self) -> Result<Vec<u8>, ConfigError>;
}

/// Monitor document stored on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl ConfigSource for FileSource {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn load(&self) -> Result<Vec<u8>, ConfigError> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

/// One pair from the remote store's KV listing.
#[derive(Debug, Deserialize)]
struct KvPair {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

/// Monitor document assembled from every pair under a key prefix in a
/// Consul-compatible key-value store.
///
/// Values are concatenated in key order with a newline between them, so a
/// document may be split across several keys.
#[derive(Debug, Clone)]
pub struct ConsulSource {
    client: Client,
    base_url: String,
    prefix: String,
    token: Option<String>,
}

impl ConsulSource {
    /// Create a source for `addr` (scheme optional, `http` assumed).
    ///
    /// # Errors
    /// Returns `ConfigError::RemoteError` if the HTTP client cannot be built.
    pub fn new(
        addr: impl AsRef<str>,
        prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::RemoteError(e.to_string()))?;

        let addr = addr.as_ref().trim().trim_end_matches('/');
        let base_url = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{}", addr)
        };

        Ok(Self {
            client,
            base_url,
            prefix: prefix.into().trim_matches('/').to_string(),
            token: None,
        })
    }

    /// Send an ACL token with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn list_url(&self) -> String {
        format!("{}/v1/kv/{}", self.base_url, self.prefix)
    }

    fn empty(&self) -> ConfigError {
        ConfigError::EmptyRemote {
            addr: self.base_url.clone(),
            prefix: self.prefix.clone(),
        }
    }
}

#[async_trait::async_trait]
impl ConfigSource for ConsulSource {
    fn describe(&self) -> String {
        format!("consul:{}/{}", self.base_url, self.prefix)
    }

    async fn load(&self) -> Result<Vec<u8>, ConfigError> {
        let mut request = self
            .client
            .get(self.list_url())
            .query(&[("recurse", "true")]);
        if let Some(ref token) = self.token {
            request = request.header(CONSUL_TOKEN_HEADER, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConfigError::RemoteError(e.to_string()))?;

        // The store answers 404 when nothing lives under the prefix.
        if response.status() == StatusCode::NOT_FOUND {
            return Err(self.empty());
        }
        let response = response
            .error_for_status()
            .map_err(|e| ConfigError::RemoteError(e.to_string()))?;

        let mut pairs: Vec<KvPair> = response
            .json()
            .await
            .map_err(|e| ConfigError::RemoteError(format!("invalid KV listing: {}", e)))?;
        if pairs.is_empty() {
            return Err(self.empty());
        }
        pairs.sort_by(|a, b| a.key.cmp(&b.key));

        let mut document = Vec::new();
        for pair in pairs {
            if let Some(encoded) = pair.value {
                let value = BASE64.decode(encoded.as_bytes()).map_err(|e| {
                    ConfigError::RemoteError(format!("invalid value for key '{}': {}", pair.key, e))
                })?;
                document.extend_from_slice(&value);
            }
            document.push(PAIR_SEPARATOR);
        }

        tracing::debug!(source = %self.describe(), bytes = document.len(), "Loaded remote config");
        Ok(document)
    }
}
