//! Liveness probe abstraction.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use stratus_core::{Endpoint, StratusError};

/// A single liveness check against one endpoint.
///
/// The monitor prefers an application-level probe (a no-op call answered by
/// the remote dispatcher); `TcpProber` is the bare transport-level fallback
/// used when no registered service claims the endpoint.
pub trait Prober: Send + Sync + 'static {
    /// Probe one endpoint, bounded by `timeout`.
    fn probe(
        &self,
        endpoint: Endpoint,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), StratusError>> + Send + '_>>;
}

/// Transport-level probe: a bare TCP connect within the timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

impl TcpProber {
    /// Create a new TCP prober.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Prober for TcpProber {
    fn probe(
        &self,
        endpoint: Endpoint,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), StratusError>> + Send + '_>> {
        Box::pin(async move {
            match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(endpoint.addr()))
                .await
            {
                Ok(Ok(_stream)) => Ok(()),
                Ok(Err(e)) => Err(StratusError::Communication(e.into())),
                Err(_) => Err(StratusError::Timeout(timeout)),
            }
        })
    }
}
