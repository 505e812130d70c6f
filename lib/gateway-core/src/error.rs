use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Failure reaching or reading the discovery directory.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("discovery directory unreachable: {0}")]
    Unreachable(String),

    #[error("discovery directory returned malformed records: {0}")]
    Malformed(String),
}

/// Failure exchanging a request with a selected backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend {authority} returned status {status}")]
    UpstreamStatus { authority: String, status: u16 },

    #[error("transport error contacting {authority}: {message}")]
    Transport { authority: String, message: String },

    #[error("backend {authority} timed out after {timeout:?}")]
    TimedOut { authority: String, timeout: Duration },
}

/// Everything a dispatch attempt can fail with. Each variant maps to one
/// structured HTTP response; nothing escapes the dispatch boundary unhandled.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("no route for {0}")]
    RouteNotFound(String),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("circuit open, retry in {retry_after:?}")]
    CircuitOpen { retry_after: Duration },
}

impl GatewayError {
    /// HTTP status surfaced to the original caller.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::RouteNotFound(_) => 404,
            GatewayError::Discovery(_) | GatewayError::Backend(_) | GatewayError::CircuitOpen { .. } => 502,
        }
    }

    /// Stable code carried in the structured error body.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            GatewayError::Discovery(_) => "DISCOVERY_UNAVAILABLE",
            GatewayError::Backend(_) => "BACKEND_FAILURE",
            GatewayError::CircuitOpen { .. } => "CIRCUIT_OPEN",
        }
    }

    /// Whether this outcome moves the breaker's failure counter. Caller
    /// errors and breaker rejections say nothing about backend health.
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, GatewayError::Discovery(_) | GatewayError::Backend(_))
    }
}
