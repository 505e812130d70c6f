//! Per-request exchange state

use gateway_core::Principal;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::{HeaderMap, Method, Request};

/// One inbound request, buffered and ready to dispatch.
///
/// Built after the body is fully collected, destroyed when the exchange
/// completes or fails. Never persisted.
#[derive(Clone, Debug)]
pub struct InboundExchange {
    pub method: Method,
    /// Path plus query string, exactly as received.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub principal: Option<Principal>,
}

impl InboundExchange {
    /// Buffer the request body and capture the pieces needed to forward.
    pub async fn from_request(
        req: Request<hyper::body::Incoming>,
        principal: Option<Principal>,
    ) -> Result<Self, hyper::Error> {
        let (parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        let body = body.collect().await?.to_bytes();
        Ok(Self {
            method: parts.method,
            path_and_query,
            headers: parts.headers,
            body,
            principal,
        })
    }
}
