/**
 * PULL API - REST endpoints of the DevSecWatch backend used by the live core
 *
 * ROLE:
 * Bearer-authenticated reads and write-throughs behind the `ScanBackend` seam,
 * so the cache and the poller can be driven by a scripted backend in tests.
 *
 * ENDPOINTS:
 * - GET  /api/notifications               -> Vec<Notification>
 * - GET  /api/notifications/unread-count  -> u64
 * - PUT  /api/notifications/{id}/read
 * - PUT  /api/notifications/read-all
 * - GET  /api/scans/{id}                  -> Scan
 */

use crate::error::{LiveError, Result};
use crate::models::{Notification, Scan};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait ScanBackend: Send + Sync {
    async fn list_notifications(&self, token: &str) -> Result<Vec<Notification>>;

    async fn unread_count(&self, token: &str) -> Result<u64>;

    async fn mark_read(&self, token: &str, id: i64) -> Result<()>;

    async fn mark_all_read(&self, token: &str) -> Result<()>;

    async fn get_scan(&self, token: &str, scan_id: i64) -> Result<Scan>;
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("devsecwatch-live/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, endpoint: &str) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!(%status, endpoint, "backend response");
        if !status.is_success() {
            return Err(LiveError::Status { status: status.as_u16(), endpoint: endpoint.to_string() });
        }
        Ok(response)
    }
}

#[async_trait]
impl ScanBackend for HttpBackend {
    async fn list_notifications(&self, token: &str) -> Result<Vec<Notification>> {
        let endpoint = "/api/notifications";
        let response = self.send(self.client.get(self.url(endpoint)).bearer_auth(token), endpoint).await?;
        // Decode from bytes so schema errors surface as `Decode`, not as `Http`.
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn unread_count(&self, token: &str) -> Result<u64> {
        let endpoint = "/api/notifications/unread-count";
        let response = self.send(self.client.get(self.url(endpoint)).bearer_auth(token), endpoint).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn mark_read(&self, token: &str, id: i64) -> Result<()> {
        let endpoint = format!("/api/notifications/{id}/read");
        let request = self.client.put(self.url(&endpoint)).bearer_auth(token).json(&serde_json::json!({}));
        self.send(request, &endpoint).await?;
        Ok(())
    }

    async fn mark_all_read(&self, token: &str) -> Result<()> {
        let endpoint = "/api/notifications/read-all";
        let request = self.client.put(self.url(endpoint)).bearer_auth(token).json(&serde_json::json!({}));
        self.send(request, endpoint).await?;
        Ok(())
    }

    async fn get_scan(&self, token: &str, scan_id: i64) -> Result<Scan> {
        let endpoint = format!("/api/scans/{scan_id}");
        let request = self.client.get(self.url(&endpoint)).bearer_auth(token);
        let response = self.send(request, &endpoint).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
