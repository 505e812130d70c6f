//! Endpoint records published by the discovery directory
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key carrying the logical API name a record serves.
/// Records without it are never routing candidates.
pub const API_NAME_KEY: &str = "api.name";

/// Wire protocol spoken by a backend endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Http,
}

/// One backend instance as published by the discovery directory.
///
/// Records are immutable once handed to the dispatcher; several records may
/// share a `service_name` and act as load-balancing candidates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub service_name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl EndpointRecord {
    pub fn new(service_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            host: host.into(),
            port,
            protocol: Protocol::Http,
            metadata: HashMap::new(),
        }
    }

    /// Tag this record as serving `name` under the gateway mount prefix.
    pub fn with_api_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.insert(API_NAME_KEY.to_string(), name.into());
        self
    }

    /// Logical API name this record serves, if tagged.
    pub fn api_name(&self) -> Option<&str> {
        self.metadata.get(API_NAME_KEY).map(String::as_str)
    }

    /// `host:port` authority for client connections.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
