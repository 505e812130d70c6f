//! Request dispatch engine: prefix routing, circuit breaking and forwarding
pub mod auth;
pub mod breaker;
pub mod dispatcher;
pub mod exchange;
pub mod forwarder;
pub mod load_balancer;
pub mod metrics;
pub mod pool;

pub use auth::{Authenticator, NoAuth, TrustedHeaderAuthenticator};
pub use breaker::{CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitPhase};
pub use dispatcher::{split_target, Dispatcher, DispatcherConfig, RouteTarget};
pub use exchange::InboundExchange;
pub use forwarder::{RequestForwarder, PRINCIPAL_HEADER};
pub use load_balancer::{LoadBalancer, LoadBalancingStrategy};
pub use metrics::MetricsCollector;
pub use pool::{ClientLease, ClientPool, HttpClient};
