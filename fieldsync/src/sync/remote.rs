//! Remote API client
//!
//! The sync engine only sees the `RemoteClient` trait, so tests and
//! alternative transports can stand in for the HTTP implementation.

use crate::config::{SyncSettings, HEALTH_ENDPOINT};
use crate::database::HttpMethod;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// One replayed mutation
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: HttpMethod,
    /// Path relative to the API base URL, e.g. `/api/journal`
    pub endpoint: String,
    pub body: Option<Value>,
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Send a request and return the HTTP status code.
    ///
    /// Transport failures are errors; non-2xx statuses are not.
    async fn send(&self, request: &RemoteRequest) -> Result<u16>;

    /// Cheap reachability check
    async fn ping(&self) -> bool;
}

/// reqwest-backed client for the REST API
#[derive(Clone)]
pub struct HttpRemoteClient {
    base_url: String,
    auth_token: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpRemoteClient {
    pub fn new(settings: &SyncSettings) -> Result<Self> {
        let base_url = normalize_base_url(&settings.api_base_url)?;
        let timeout = settings.request_timeout();

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            auth_token: settings
                .auth_token
                .as_ref()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            timeout,
            client,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn map_error(&self, err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            AppError::Timeout(self.timeout.as_secs())
        } else {
            AppError::from(err)
        }
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn send(&self, request: &RemoteRequest) -> Result<u16> {
        let url = self.url(&request.endpoint);

        let mut builder = match request.method {
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        tracing::debug!("{} {} -> {}", request.method, request.endpoint, status);

        Ok(status)
    }

    async fn ping(&self) -> bool {
        match self.client.get(self.url(HEALTH_ENDPOINT)).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                tracing::debug!("Reachability probe failed: {}", e);
                false
            }
        }
    }
}

/// Stand-in used while no API base URL is configured. Never reachable, so
/// records stay queued locally until one is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredRemote;

#[async_trait]
impl RemoteClient for UnconfiguredRemote {
    async fn send(&self, _request: &RemoteRequest) -> Result<u16> {
        Err(AppError::Config("api_base_url is not configured".to_string()))
    }

    async fn ping(&self) -> bool {
        false
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(AppError::Config("api_base_url must not be empty".to_string()));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(AppError::Config(
            "api_base_url must include http:// or https://".to_string(),
        ));
    }
    Ok(url.trim_end_matches('/').to_string())
}
