//! Pooled HTTP clients per backend authority with leased handles

use gateway_core::EndpointRecord;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::tokio::TokioExecutor;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Per-authority pooled clients.
///
/// `acquire` hands out a leased handle for one exchange; the lease is
/// released on drop, so every exit path of a forward (success, upstream
/// error, timeout, caller disconnect) returns it.
pub struct ClientPool {
    clients: RwLock<HashMap<String, HttpClient>>,
    active_leases: Arc<AtomicUsize>,
    connect_timeout: Duration,
}

impl ClientPool {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            active_leases: Arc::new(AtomicUsize::new(0)),
            connect_timeout,
        }
    }

    /// Obtain a client handle for the chosen record.
    pub async fn acquire(&self, endpoint: &EndpointRecord) -> ClientLease {
        let authority = endpoint.authority();

        let client = {
            let clients = self.clients.read().await;
            clients.get(&authority).cloned()
        };

        let client = match client {
            Some(client) => client,
            None => {
                let mut clients = self.clients.write().await;
                clients
                    .entry(authority.clone())
                    .or_insert_with(|| Self::build_client(self.connect_timeout))
                    .clone()
            }
        };

        self.active_leases.fetch_add(1, Ordering::SeqCst);
        debug!(authority = %authority, "Acquired client lease");
        ClientLease {
            client,
            active_leases: self.active_leases.clone(),
        }
    }

    /// Leases currently held by in-flight exchanges.
    pub fn active_leases(&self) -> usize {
        self.active_leases.load(Ordering::SeqCst)
    }

    fn build_client(connect_timeout: Duration) -> HttpClient {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_keepalive(Some(Duration::from_secs(30)));
        Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(connector)
    }
}

/// Leased client handle, released on drop.
pub struct ClientLease {
    client: HttpClient,
    active_leases: Arc<AtomicUsize>,
}

impl ClientLease {
    pub fn client(&self) -> &HttpClient {
        &self.client
    }
}

impl Drop for ClientLease {
    fn drop(&mut self) {
        self.active_leases.fetch_sub(1, Ordering::SeqCst);
    }
}
