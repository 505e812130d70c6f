//! Prometheus metrics for the dispatch path

use crate::breaker::CircuitPhase;
use anyhow::Result;
use prometheus::{Counter, CounterVec, Encoder, HistogramVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector shared between the dispatcher and the `/metrics`
/// endpoint. Clones share the same registry.
#[derive(Clone)]
pub struct MetricsCollector {
    /// Dispatch attempts by method and extracted service name
    pub requests_total: CounterVec,
    /// Responses returned to callers by status code
    pub responses_total: CounterVec,
    /// End-to-end dispatch latency per service
    pub request_duration_seconds: HistogramVec,
    /// Calls rejected by the open circuit
    pub breaker_rejections_total: Counter,
    /// Failures counted against the breaker
    pub dispatch_failures_total: Counter,
    /// Current breaker phase (0 closed, 1 open, 2 half-open)
    pub breaker_phase: IntGauge,
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let requests_total = CounterVec::new(
            Opts::new("gateway_requests_total", "Total dispatch attempts"),
            &["method", "service"],
        )?;

        let responses_total = CounterVec::new(
            Opts::new("gateway_responses_total", "Total responses by status"),
            &["status"],
        )?;

        let request_duration_seconds = HistogramVec::new(
            Opts::new(
                "gateway_request_duration_seconds",
                "Dispatch latency in seconds",
            )
            .into(),
            &["service"],
        )?;

        let breaker_rejections_total = Counter::new(
            "gateway_breaker_rejections_total",
            "Calls rejected while the circuit is open",
        )?;

        let dispatch_failures_total = Counter::new(
            "gateway_dispatch_failures_total",
            "Dispatch failures counted against the breaker",
        )?;

        let breaker_phase = IntGauge::new(
            "gateway_breaker_phase",
            "Breaker phase: 0 closed, 1 open, 2 half-open",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(responses_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(breaker_rejections_total.clone()))?;
        registry.register(Box::new(dispatch_failures_total.clone()))?;
        registry.register(Box::new(breaker_phase.clone()))?;

        Ok(Self {
            requests_total,
            responses_total,
            request_duration_seconds,
            breaker_rejections_total,
            dispatch_failures_total,
            breaker_phase,
            registry,
        })
    }

    pub fn observe_breaker_phase(&self, phase: CircuitPhase) {
        let value = match phase {
            CircuitPhase::Closed => 0,
            CircuitPhase::Open => 1,
            CircuitPhase::HalfOpen => 2,
        };
        self.breaker_phase.set(value);
    }

    /// Gather all metrics in Prometheus text format.
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
