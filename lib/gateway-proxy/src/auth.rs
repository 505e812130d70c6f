//! Caller identity extraction

use gateway_core::Principal;
use hyper::http::HeaderName;
use hyper::HeaderMap;
use serde_json::Value;
use tracing::debug;

/// Produces the optional caller identity for an inbound request.
///
/// Token validation and session handling live in a collaborator in front of
/// the gateway; this seam only consumes whatever identity that layer
/// established.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Option<Principal>;
}

/// Treats every caller as anonymous.
pub struct NoAuth;

#[async_trait::async_trait]
impl Authenticator for NoAuth {
    async fn authenticate(&self, _headers: &HeaderMap) -> Option<Principal> {
        None
    }
}

/// Reads JSON claims from a header set by a trusted fronting auth layer.
pub struct TrustedHeaderAuthenticator {
    header: HeaderName,
}

impl TrustedHeaderAuthenticator {
    pub const DEFAULT_HEADER: &'static str = "x-gateway-claims";

    pub fn new() -> Self {
        Self {
            header: HeaderName::from_static(Self::DEFAULT_HEADER),
        }
    }

    pub fn with_header(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Default for TrustedHeaderAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Authenticator for TrustedHeaderAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> Option<Principal> {
        let raw = headers.get(&self.header)?.to_str().ok()?;
        match serde_json::from_str::<Value>(raw) {
            Ok(claims) => Some(Principal(claims)),
            Err(e) => {
                debug!(error = %e, "Ignoring unparseable claims header");
                None
            }
        }
    }
}
