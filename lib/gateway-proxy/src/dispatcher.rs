//! Prefix routing and the breaker-guarded dispatch loop

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::exchange::InboundExchange;
use crate::forwarder::RequestForwarder;
use crate::load_balancer::{LoadBalancer, LoadBalancingStrategy};
use crate::metrics::MetricsCollector;
use gateway_core::{EndpointDirectory, EndpointRecord, GatewayError};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::http::header::CONTENT_TYPE;
use hyper::Response;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Where a parsed path wants to go: the logical service plus the path
/// forwarded to it (query string preserved).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteTarget {
    pub service: String,
    pub forwarded_path: String,
}

/// Split an inbound path into its route target.
///
/// The path must begin with the mount prefix and carry at least one
/// non-empty segment after it. The remainder keeps its leading `/`; an empty
/// remainder forwards `/`. No registry contact happens here.
pub fn split_target(path_and_query: &str, mount_prefix: &str) -> Option<RouteTarget> {
    let rest = path_and_query.strip_prefix(mount_prefix)?;
    if rest.is_empty() {
        return None;
    }
    let (service, remainder) = match rest.find(['/', '?']) {
        Some(split) => (&rest[..split], &rest[split..]),
        None => (rest, ""),
    };
    if service.is_empty() {
        return None;
    }
    let forwarded_path = if remainder.is_empty() {
        "/".to_string()
    } else if remainder.starts_with('?') {
        format!("/{remainder}")
    } else {
        remainder.to_string()
    };
    Some(RouteTarget {
        service: service.to_string(),
        forwarded_path,
    })
}

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Prefix the gateway is mounted under, with trailing slash.
    pub mount_prefix: String,
    /// Bound on one backend exchange.
    pub upstream_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
    pub strategy: LoadBalancingStrategy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            mount_prefix: "/api/".to_string(),
            upstream_timeout: Duration::from_secs(30),
            breaker: CircuitBreakerConfig::default(),
            strategy: LoadBalancingStrategy::default(),
        }
    }
}

/// Resolves inbound requests against the endpoint directory and forwards
/// them, with the whole resolve-and-forward operation guarded by one
/// circuit breaker.
pub struct Dispatcher {
    directory: Arc<dyn EndpointDirectory>,
    balancer: LoadBalancer,
    forwarder: RequestForwarder,
    breaker: CircuitBreaker,
    metrics: MetricsCollector,
    mount_prefix: String,
}

impl Dispatcher {
    pub fn new(
        directory: Arc<dyn EndpointDirectory>,
        config: DispatcherConfig,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            directory,
            balancer: LoadBalancer::new(config.strategy),
            forwarder: RequestForwarder::new(config.upstream_timeout),
            breaker: CircuitBreaker::new(config.breaker),
            metrics,
            mount_prefix: config.mount_prefix,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Dispatch one exchange. Every failure is converted to a structured
    /// response here; nothing propagates to the server loop.
    pub async fn dispatch(&self, exchange: InboundExchange) -> Response<Full<Bytes>> {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "dispatch",
            %request_id,
            method = %exchange.method,
            path = %exchange.path_and_query,
        );

        async move {
            let started = std::time::Instant::now();
            let service = split_target(&exchange.path_and_query, &self.mount_prefix)
                .map(|t| t.service)
                .unwrap_or_default();

            let response = match self.run(&exchange).await {
                Ok(upstream) => relay(upstream, request_id),
                Err(err) => {
                    warn!(code = err.code(), error = %err, "Dispatch failed");
                    error_response(&err, request_id)
                }
            };

            if !service.is_empty() {
                self.metrics
                    .request_duration_seconds
                    .with_label_values(&[&service])
                    .observe(started.elapsed().as_secs_f64());
            }
            self.metrics
                .responses_total
                .with_label_values(&[&response.status().as_u16().to_string()])
                .inc();
            self.metrics.observe_breaker_phase(self.breaker.phase());
            response
        }
        .instrument(span)
        .await
    }

    async fn run(&self, exchange: &InboundExchange) -> Result<Response<Bytes>, GatewayError> {
        let Some(target) = split_target(&exchange.path_and_query, &self.mount_prefix) else {
            return Err(GatewayError::RouteNotFound(exchange.path_and_query.clone()));
        };

        self.metrics
            .requests_total
            .with_label_values(&[exchange.method.as_str(), &target.service])
            .inc();

        let permit = self.breaker.try_acquire().map_err(|rejected| {
            self.metrics.breaker_rejections_total.inc();
            GatewayError::CircuitOpen {
                retry_after: rejected.retry_after,
            }
        })?;

        let records = match self.directory.list_endpoints().await {
            Ok(records) => records,
            Err(e) => {
                permit.failure();
                self.metrics.dispatch_failures_total.inc();
                return Err(e.into());
            }
        };

        let candidates: Vec<EndpointRecord> = records
            .into_iter()
            .filter(|r| r.api_name() == Some(target.service.as_str()))
            .collect();

        let Some(endpoint) = self.balancer.select(&candidates) else {
            // Caller asked for a service nobody registered; says nothing
            // about dependency health.
            permit.abandon();
            return Err(GatewayError::RouteNotFound(exchange.path_and_query.clone()));
        };

        debug!(
            service = %target.service,
            endpoint = %endpoint.authority(),
            forwarded_path = %target.forwarded_path,
            candidates = candidates.len(),
            "Selected endpoint"
        );

        match self
            .forwarder
            .forward(endpoint, &target.forwarded_path, exchange)
            .await
        {
            Ok(response) => {
                permit.success();
                Ok(response)
            }
            Err(e) => {
                permit.failure();
                self.metrics.dispatch_failures_total.inc();
                Err(e.into())
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
}

fn relay(upstream: Response<Bytes>, request_id: Uuid) -> Response<Full<Bytes>> {
    let (mut parts, body) = upstream.into_parts();
    if let Ok(value) = hyper::http::HeaderValue::from_str(&request_id.to_string()) {
        parts.headers.insert("x-request-id", value);
    }
    Response::from_parts(parts, Full::new(body))
}

fn error_response(err: &GatewayError, request_id: Uuid) -> Response<Full<Bytes>> {
    let body = ErrorBody {
        code: err.code(),
        message: err.to_string(),
    };
    let body = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(err.status())
        .header(CONTENT_TYPE, "application/json")
        .header("x-request-id", request_id.to_string())
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
