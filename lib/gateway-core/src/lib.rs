//! Core data model and contracts for the API gateway
//!
//! This library provides:
//! - Endpoint records published by the discovery directory
//! - The `EndpointDirectory` contract the dispatcher consumes
//! - The gateway error taxonomy and its HTTP/breaker policy

pub mod endpoint;
pub mod error;
pub mod principal;
pub mod registry;

pub use endpoint::{EndpointRecord, Protocol, API_NAME_KEY};
pub use error::{BackendError, DiscoveryError, GatewayError, Result};
pub use principal::Principal;
pub use registry::{EndpointDirectory, ServiceRegistry};
