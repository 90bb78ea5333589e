//! Application-level liveness probe.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use stratus_core::{
    CallEnvelope, CorrelationId, Endpoint, StratusError, WireCodec, WireMessage, PING_SERVICE_ID,
};
use stratus_health::{AddressRegistry, Prober, TcpProber};

use crate::cache::ConnectionCache;
use crate::client::RemoteInvoker;
use crate::mux::Multiplexer;

/// Prefer-application-probe with transport-level fallback.
///
/// When the address registry claims the endpoint, liveness is checked with
/// a no-op call to the built-in ping service through the shared connection
/// cache, expecting a reply within the probe timeout. Endpoints no
/// registered service claims yet fall back to a bare TCP connect.
///
/// Probes reuse the invoker's cache and correlation table but bypass its
/// failure reporting: the monitor accounts for probe outcomes itself, so a
/// failed probe must not be double-counted.
pub struct RpcProber {
    cache: Arc<ConnectionCache>,
    mux: Arc<Multiplexer>,
    wire: Arc<dyn WireCodec>,
    registry: Arc<dyn AddressRegistry>,
    fallback: TcpProber,
}

impl RpcProber {
    /// Build a prober sharing the invoker's cache and correlation table.
    #[must_use]
    pub fn new(invoker: &RemoteInvoker, registry: Arc<dyn AddressRegistry>) -> Self {
        Self {
            cache: invoker.cache().clone(),
            mux: invoker.multiplexer().clone(),
            wire: invoker.wire().clone(),
            registry,
            fallback: TcpProber::new(),
        }
    }

    async fn ping(&self, endpoint: &Endpoint, timeout: Duration) -> Result<(), StratusError> {
        let connection = self
            .cache
            .get_or_create(endpoint)
            .await
            .map_err(StratusError::Communication)?;

        let correlation_id = CorrelationId::generate();
        let pending = self.mux.register(correlation_id.clone())?;

        let envelope = CallEnvelope::new(correlation_id.clone(), PING_SERVICE_ID);
        let payload = self.wire.encode(&WireMessage::Call(envelope))?;

        if let Err(e) = connection.send(&payload).await {
            self.mux.discard(&correlation_id);
            self.cache.evict(endpoint).await;
            return Err(StratusError::Communication(e));
        }

        self.mux.await_reply(pending, Some(timeout)).await.map(|_| ())
    }
}

impl Prober for RpcProber {
    fn probe(
        &self,
        endpoint: Endpoint,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), StratusError>> + Send + '_>> {
        Box::pin(async move {
            if self.registry.claims(&endpoint) {
                self.ping(&endpoint, timeout).await
            } else {
                self.fallback.probe(endpoint, timeout).await
            }
        })
    }
}
