//! Endpoint directory contract and the in-memory registry

use crate::endpoint::EndpointRecord;
use crate::error::DiscoveryError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Directory of currently known backend endpoints.
///
/// `list_endpoints` returns a snapshot: callers own the returned records and
/// see no later mutations. Implementations must not retry internally; an
/// unreachable directory surfaces as `DiscoveryError` and is accounted for at
/// the dispatch boundary.
#[async_trait::async_trait]
pub trait EndpointDirectory: Send + Sync {
    async fn list_endpoints(&self) -> Result<Vec<EndpointRecord>, DiscoveryError>;
}

/// In-memory endpoint registry keyed by `service_name`.
///
/// Serves as the directory when the gateway runs without an external
/// discovery collaborator, and as the test-facing implementation.
pub struct ServiceRegistry {
    records: Arc<RwLock<HashMap<String, Vec<EndpointRecord>>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register one endpoint record. Multiple records may share a service
    /// name; all of them stay visible in the snapshot.
    pub async fn register(&self, record: EndpointRecord) {
        let mut records = self.records.write().await;
        debug!(service = %record.service_name, authority = %record.authority(), "Registered endpoint");
        records
            .entry(record.service_name.clone())
            .or_default()
            .push(record);
    }

    /// Remove every record registered under `service_name`.
    pub async fn deregister(&self, service_name: &str) {
        let mut records = self.records.write().await;
        records.remove(service_name);
        debug!(service = %service_name, "Deregistered service");
    }

    pub async fn record_count(&self) -> usize {
        let records = self.records.read().await;
        records.values().map(Vec::len).sum()
    }
}

#[async_trait::async_trait]
impl EndpointDirectory for ServiceRegistry {
    async fn list_endpoints(&self) -> Result<Vec<EndpointRecord>, DiscoveryError> {
        let records = self.records.read().await;
        Ok(records.values().flatten().cloned().collect())
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_snapshot() {
        let registry = ServiceRegistry::new();
        registry
            .register(EndpointRecord::new("events", "h1", 9000).with_api_name("events"))
            .await;
        registry
            .register(EndpointRecord::new("events", "h2", 9000).with_api_name("events"))
            .await;

        let snapshot = registry.list_endpoints().await.expect("snapshot");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.record_count().await, 2);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached_from_later_writes() {
        let registry = ServiceRegistry::new();
        registry
            .register(EndpointRecord::new("events", "h1", 9000).with_api_name("events"))
            .await;

        let snapshot = registry.list_endpoints().await.expect("snapshot");
        registry.deregister("events").await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_deregister_unknown_service_is_noop() {
        let registry = ServiceRegistry::new();
        registry.deregister("missing").await;
        assert!(registry.list_endpoints().await.expect("snapshot").is_empty());
    }
}
