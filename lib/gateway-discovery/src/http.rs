//! HTTP client for an external discovery directory

use gateway_core::{DiscoveryError, EndpointDirectory, EndpointRecord};
use std::time::Duration;
use tracing::debug;

/// Queries a discovery directory over HTTP for the current endpoint snapshot.
///
/// The directory is expected to serve a JSON array of endpoint records at the
/// configured URL. Each `list_endpoints` call is one fresh query; there is no
/// caching and no retry here, failures are surfaced to the dispatch boundary.
pub struct HttpDirectory {
    client: reqwest::Client,
    endpoint_url: String,
}

impl HttpDirectory {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint_url: endpoint_url.into(),
        }
    }

    pub fn with_client(client: reqwest::Client, endpoint_url: impl Into<String>) -> Self {
        Self {
            client,
            endpoint_url: endpoint_url.into(),
        }
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }
}

#[async_trait::async_trait]
impl EndpointDirectory for HttpDirectory {
    async fn list_endpoints(&self) -> Result<Vec<EndpointRecord>, DiscoveryError> {
        let response = self
            .client
            .get(&self.endpoint_url)
            .send()
            .await
            .map_err(|e| DiscoveryError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Unreachable(format!(
                "directory returned status {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DiscoveryError::Unreachable(e.to_string()))?;

        let records: Vec<EndpointRecord> =
            serde_json::from_slice(&body).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;

        debug!(count = records.len(), url = %self.endpoint_url, "Fetched endpoint snapshot");
        Ok(records)
    }
}
