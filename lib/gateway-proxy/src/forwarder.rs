//! Request/response exchange with a selected backend

use crate::exchange::InboundExchange;
use crate::pool::ClientPool;
use gateway_core::{BackendError, EndpointRecord};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::http::HeaderValue;
use hyper::{Request, Response, Uri};
use std::time::Duration;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, warn};

/// Header carrying the caller's encoded claims to backends. Backends trust
/// the gateway's network boundary for it; an inbound copy is always dropped.
pub const PRINCIPAL_HEADER: &str = "user-principal";

/// Forwards one buffered exchange to a backend and mirrors the response.
///
/// A response with status >= 500 is never relayed; it surfaces as a
/// [`BackendError`] for the breaker to count, as do transport errors and
/// timeouts. Everything below 500 is mirrored verbatim.
pub struct RequestForwarder {
    pool: ClientPool,
    timeout: Duration,
}

impl RequestForwarder {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pool: ClientPool::new(timeout),
            timeout,
        }
    }

    pub fn pool(&self) -> &ClientPool {
        &self.pool
    }

    pub async fn forward(
        &self,
        endpoint: &EndpointRecord,
        path: &str,
        exchange: &InboundExchange,
    ) -> Result<Response<Bytes>, BackendError> {
        let authority = endpoint.authority();
        let uri: Uri = format!("http://{authority}{path}")
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| BackendError::Transport {
                authority: authority.clone(),
                message: e.to_string(),
            })?;

        let mut request = Request::new(Full::new(exchange.body.clone()));
        *request.method_mut() = exchange.method.clone();
        *request.uri_mut() = uri;

        let headers = request.headers_mut();
        for (name, value) in exchange.headers.iter() {
            if is_hop_by_hop_header(name.as_str()) || name == PRINCIPAL_HEADER {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        if let Some(principal) = &exchange.principal {
            match HeaderValue::from_str(&principal.encode()) {
                Ok(value) => {
                    headers.insert(PRINCIPAL_HEADER, value);
                }
                Err(_) => {
                    warn!("Principal claims are not header-safe, forwarding without identity");
                }
            }
        }

        debug!(
            method = %exchange.method,
            authority = %authority,
            path = %path,
            "Forwarding request to backend"
        );

        let lease = self.pool.acquire(endpoint).await;
        let exchange_result = tokio_timeout(self.timeout, async {
            let response =
                lease
                    .client()
                    .request(request)
                    .await
                    .map_err(|e| BackendError::Transport {
                        authority: authority.clone(),
                        message: e.to_string(),
                    })?;
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| BackendError::Transport {
                    authority: authority.clone(),
                    message: e.to_string(),
                })?
                .to_bytes();
            Ok::<_, BackendError>((parts, body))
        })
        .await;
        drop(lease);

        let (parts, body) = match exchange_result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(BackendError::TimedOut {
                    authority,
                    timeout: self.timeout,
                })
            }
        };

        let status = parts.status.as_u16();
        if status >= 500 {
            warn!(authority = %authority, status, "Backend server error, suppressing response");
            return Err(BackendError::UpstreamStatus { authority, status });
        }

        debug!(authority = %authority, status, bytes = body.len(), "Backend responded");
        Ok(Response::from_parts(parts, body))
    }
}

/// Hop-by-hop headers are connection-scoped and never forwarded.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::Principal;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{HeaderMap, Method, StatusCode};
    use hyper_util::rt::tokio::TokioIo;
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    /// Backend that echoes the request back: method and path in headers,
    /// body verbatim, selected inbound headers mirrored as x-echo-*.
    async fn spawn_echo_backend() -> SocketAddr {
        spawn_backend(|req: Request<hyper::body::Incoming>| async move {
            let method = req.method().clone();
            let path = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_default();
            let principal = req
                .headers()
                .get(PRINCIPAL_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let connection = req
                .headers()
                .get("connection")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let body = req.into_body().collect().await?.to_bytes();

            let response = Response::builder()
                .status(StatusCode::OK)
                .header("x-echo-method", method.as_str())
                .header("x-echo-path", path)
                .header("x-echo-principal", principal)
                .header("x-echo-connection", connection)
                .header("x-backend", "echo")
                .body(Full::new(body))
                .unwrap();
            Ok::<_, hyper::Error>(response)
        })
        .await
    }

    async fn spawn_status_backend(status: u16) -> SocketAddr {
        spawn_backend(move |req: Request<hyper::body::Incoming>| async move {
            req.into_body().collect().await?;
            Ok::<_, hyper::Error>(
                Response::builder()
                    .status(status)
                    .body(Full::new(Bytes::from("backend detail")))
                    .unwrap(),
            )
        })
        .await
    }

    async fn spawn_slow_backend(delay: Duration) -> SocketAddr {
        spawn_backend(move |_req: Request<hyper::body::Incoming>| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from("late"))))
        })
        .await
    }

    async fn spawn_backend<F, Fut>(handler: F) -> SocketAddr
    where
        F: Fn(Request<hyper::body::Incoming>) -> Fut + Clone + Send + 'static,
        Fut: std::future::Future<Output = Result<Response<Full<Bytes>>, hyper::Error>>
            + Send
            + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::task::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let io = TokioIo::new(stream);
                let handler = handler.clone();
                tokio::task::spawn(async move {
                    let _ = http1::Builder::new()
                        .serve_connection(io, service_fn(handler))
                        .await;
                });
            }
        });
        addr
    }

    fn record_for(addr: SocketAddr) -> EndpointRecord {
        EndpointRecord::new("events", addr.ip().to_string(), addr.port()).with_api_name("events")
    }

    fn exchange(method: Method, body: &str, principal: Option<Principal>) -> InboundExchange {
        InboundExchange {
            method,
            path_and_query: "/api/events/42".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
            principal,
        }
    }

    #[tokio::test]
    async fn test_method_path_and_body_preserved() {
        let addr = spawn_echo_backend().await;
        let forwarder = RequestForwarder::new(Duration::from_secs(5));

        let response = forwarder
            .forward(
                &record_for(addr),
                "/42?verbose=1",
                &exchange(Method::POST, "payload bytes", None),
            )
            .await
            .expect("forward");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-echo-method"], "POST");
        assert_eq!(response.headers()["x-echo-path"], "/42?verbose=1");
        assert_eq!(response.body().as_ref(), b"payload bytes");
        assert_eq!(forwarder.pool().active_leases(), 0);
    }

    #[tokio::test]
    async fn test_principal_header_added_and_spoof_dropped() {
        let addr = spawn_echo_backend().await;
        let forwarder = RequestForwarder::new(Duration::from_secs(5));

        let mut ex = exchange(
            Method::GET,
            "",
            Some(Principal(json!({"sub": "alice"}))),
        );
        ex.headers.insert(
            PRINCIPAL_HEADER,
            HeaderValue::from_static("{\"sub\":\"mallory\"}"),
        );

        let response = forwarder
            .forward(&record_for(addr), "/", &ex)
            .await
            .expect("forward");

        let forwarded = response.headers()["x-echo-principal"]
            .to_str()
            .expect("principal header");
        assert!(forwarded.contains("alice"));
        assert!(!forwarded.contains("mallory"));
    }

    #[tokio::test]
    async fn test_anonymous_exchange_has_no_principal_header() {
        let addr = spawn_echo_backend().await;
        let forwarder = RequestForwarder::new(Duration::from_secs(5));

        let response = forwarder
            .forward(&record_for(addr), "/", &exchange(Method::GET, "", None))
            .await
            .expect("forward");

        assert_eq!(response.headers()["x-echo-principal"], "");
    }

    #[tokio::test]
    async fn test_hop_by_hop_headers_not_forwarded() {
        let addr = spawn_echo_backend().await;
        let forwarder = RequestForwarder::new(Duration::from_secs(5));

        let mut ex = exchange(Method::GET, "", None);
        ex.headers
            .insert("connection", HeaderValue::from_static("close"));

        let response = forwarder
            .forward(&record_for(addr), "/", &ex)
            .await
            .expect("forward");

        assert_eq!(response.headers()["x-echo-connection"], "");
    }

    #[tokio::test]
    async fn test_server_error_is_suppressed() {
        let addr = spawn_status_backend(503).await;
        let forwarder = RequestForwarder::new(Duration::from_secs(5));

        let err = forwarder
            .forward(&record_for(addr), "/", &exchange(Method::GET, "", None))
            .await
            .expect_err("5xx must not relay");

        assert!(matches!(
            err,
            BackendError::UpstreamStatus { status: 503, .. }
        ));
        assert_eq!(forwarder.pool().active_leases(), 0);
    }

    #[tokio::test]
    async fn test_client_error_status_relays_verbatim() {
        let addr = spawn_status_backend(404).await;
        let forwarder = RequestForwarder::new(Duration::from_secs(5));

        let response = forwarder
            .forward(&record_for(addr), "/", &exchange(Method::GET, "", None))
            .await
            .expect("4xx relays");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body().as_ref(), b"backend detail");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let forwarder = RequestForwarder::new(Duration::from_secs(1));
        let unreachable = EndpointRecord::new("events", "127.0.0.1", 1).with_api_name("events");

        let err = forwarder
            .forward(&unreachable, "/", &exchange(Method::GET, "", None))
            .await
            .expect_err("must fail");

        assert!(matches!(err, BackendError::Transport { .. }));
        assert_eq!(forwarder.pool().active_leases(), 0);
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let addr = spawn_slow_backend(Duration::from_millis(500)).await;
        let forwarder = RequestForwarder::new(Duration::from_millis(50));

        let err = forwarder
            .forward(&record_for(addr), "/", &exchange(Method::GET, "", None))
            .await
            .expect_err("must time out");

        assert!(matches!(err, BackendError::TimedOut { .. }));
        assert_eq!(forwarder.pool().active_leases(), 0);
    }
}
