//! The remote invocation façade.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use stratus_core::{
    CallEnvelope, CorrelationId, Endpoint, ResultEnvelope, StratusError, WireCodec, WireMessage,
};
use stratus_health::{AddressRegistry, HealthMonitor};

use crate::cache::ConnectionCache;
use crate::conn::ConnectConfig;
use crate::mux::Multiplexer;

/// Where a call is aimed: a concrete endpoint, or a service id resolved
/// through the address registry.
#[derive(Debug, Clone)]
pub enum CallTarget {
    /// A concrete endpoint.
    Endpoint(Endpoint),
    /// A service id to resolve through the registry.
    Service(String),
}

impl From<Endpoint> for CallTarget {
    fn from(endpoint: Endpoint) -> Self {
        Self::Endpoint(endpoint)
    }
}

impl From<&Endpoint> for CallTarget {
    fn from(endpoint: &Endpoint) -> Self {
        Self::Endpoint(endpoint.clone())
    }
}

impl From<&str> for CallTarget {
    fn from(service: &str) -> Self {
        Self::Service(service.to_string())
    }
}

impl From<String> for CallTarget {
    fn from(service: String) -> Self {
        Self::Service(service)
    }
}

/// Configuration for the remote invoker.
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Timeout applied when a call supplies none. Keeps every call bounded.
    pub default_timeout: Duration,

    /// Connection settings for the underlying cache.
    pub connect: ConnectConfig,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            connect: ConnectConfig::default(),
        }
    }
}

impl InvokerConfig {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default call timeout.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the connection settings.
    #[must_use]
    pub fn connect(mut self, connect: ConnectConfig) -> Self {
        self.connect = connect;
        self
    }
}

/// Client-side façade for calling named services on remote processes.
///
/// A call obtains the shared connection for its endpoint, registers a
/// pending entry in the correlation table, sends the envelope, and suspends
/// until the reply, the timeout, or a cancellation fires. Transport
/// failures evict the connection and are reported to the attached health
/// monitor; timeouts are not, since a slow endpoint is not a dead one.
///
/// ## Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use stratus_codec::EnvelopeCodec;
/// use stratus_core::{CallEnvelope, CorrelationId};
/// use stratus_transport::{InvokerConfig, RemoteInvoker};
///
/// # async fn example() -> Result<(), stratus_core::StratusError> {
/// let invoker = RemoteInvoker::new(InvokerConfig::default(), Arc::new(EnvelopeCodec::new()));
///
/// let endpoint: stratus_core::Endpoint = "10.0.0.1:9000".parse().unwrap();
/// let call = CallEnvelope::new(CorrelationId::generate(), "billing")
///     .param("invoice", b"INV-1".to_vec());
///
/// let reply = invoker.call(endpoint, call, None).await?;
/// # drop(reply);
/// # Ok(())
/// # }
/// ```
pub struct RemoteInvoker {
    config: InvokerConfig,
    wire: Arc<dyn WireCodec>,
    mux: Arc<Multiplexer>,
    cache: Arc<ConnectionCache>,
    registry: Option<Arc<dyn AddressRegistry>>,
    health: RwLock<Option<Arc<HealthMonitor>>>,
}

impl RemoteInvoker {
    /// Create a new invoker with its own connection cache and correlation
    /// table.
    #[must_use]
    pub fn new(config: InvokerConfig, wire: Arc<dyn WireCodec>) -> Self {
        let mux = Arc::new(Multiplexer::new());
        let cache = Arc::new(ConnectionCache::new(
            config.connect.clone(),
            wire.clone(),
            mux.clone(),
        ));
        Self {
            config,
            wire,
            mux,
            cache,
            registry: None,
            health: RwLock::new(None),
        }
    }

    /// Attach the address registry used to resolve service-id targets.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn AddressRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Attach the health monitor that receives failure reports.
    ///
    /// Late-bound so the monitor's application-level prober can be built
    /// from this invoker first.
    pub fn attach_health(&self, monitor: Arc<HealthMonitor>) {
        *self.health.write() = Some(monitor);
    }

    /// The shared correlation table.
    #[must_use]
    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.mux
    }

    /// The shared connection cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    /// The wire codec in use.
    #[must_use]
    pub fn wire(&self) -> &Arc<dyn WireCodec> {
        &self.wire
    }

    /// Number of calls currently awaiting replies.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.mux.pending_count()
    }

    /// Call a remote service and await its reply.
    ///
    /// With `timeout` of `None` the configured default applies, so a finite
    /// deadline always bounds the wait. Returns the result envelope on
    /// success; a remote handler failure surfaces as
    /// [`StratusError::Remote`] with the captured exception chain.
    pub async fn call(
        &self,
        target: impl Into<CallTarget>,
        envelope: CallEnvelope,
        timeout: Option<Duration>,
    ) -> Result<ResultEnvelope, StratusError> {
        let endpoint = self.resolve_target(target.into())?;
        let timeout = timeout.unwrap_or(self.config.default_timeout);

        let correlation_id = envelope.correlation_id.clone();
        let pending = self.mux.register(correlation_id.clone())?;

        let connection = match self.cache.get_or_create(&endpoint).await {
            Ok(connection) => connection,
            Err(e) => {
                self.mux.discard(&correlation_id);
                self.report_failure(&endpoint);
                return Err(StratusError::Communication(e));
            }
        };

        let payload = match self.wire.encode(&WireMessage::Call(envelope)) {
            Ok(payload) => payload,
            Err(e) => {
                self.mux.discard(&correlation_id);
                return Err(StratusError::Codec(e));
            }
        };

        if let Err(e) = connection.send(&payload).await {
            self.mux.discard(&correlation_id);
            self.cache.evict(&endpoint).await;
            self.report_failure(&endpoint);
            return Err(StratusError::Communication(e));
        }

        self.mux.await_reply(pending, Some(timeout)).await
    }

    /// Cancel an outstanding call; its waiter observes `CallCancelled`
    /// unless a reply or timeout won the race first.
    pub fn cancel(&self, correlation_id: &CorrelationId) {
        self.mux.cancel(correlation_id);
    }

    /// Fail every outstanding call and close every cached connection.
    pub async fn shutdown(&self) {
        self.mux.fail_all(StratusError::Communication(
            stratus_core::TransportError::ConnectionClosed,
        ));
        self.cache.dispose().await;
    }

    fn resolve_target(&self, target: CallTarget) -> Result<Endpoint, StratusError> {
        match target {
            CallTarget::Endpoint(endpoint) => Ok(endpoint),
            CallTarget::Service(service) => {
                let registry = self
                    .registry
                    .as_ref()
                    .ok_or_else(|| StratusError::NoAddresses(service.clone()))?;

                // Address selection policy is the registry's concern;
                // the first advertised address is used as-is
                registry
                    .addresses_for(&service)
                    .into_iter()
                    .next()
                    .ok_or(StratusError::NoAddresses(service))
            }
        }
    }

    fn report_failure(&self, endpoint: &Endpoint) {
        let monitor = self.health.read().clone();
        if let Some(monitor) = monitor {
            monitor.mark_failure(endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_codec::EnvelopeCodec;
    use stratus_health::{HealthConfig, StaticAddressRegistry};
    use tokio::net::TcpListener;

    fn invoker() -> RemoteInvoker {
        RemoteInvoker::new(InvokerConfig::default(), Arc::new(EnvelopeCodec::new()))
    }

    async fn dead_endpoint() -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from(listener.local_addr().unwrap());
        drop(listener);
        endpoint
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces_communication_error() {
        let invoker = invoker();
        let endpoint = dead_endpoint().await;

        let call = CallEnvelope::new(CorrelationId::generate(), "billing");
        let err = invoker.call(&endpoint, call, None).await.unwrap_err();

        assert!(matches!(err, StratusError::Communication(_)));
        // No pending entry may leak on the failure path
        assert_eq!(invoker.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_to_health_monitor() {
        let invoker = invoker();
        let monitor = Arc::new(HealthMonitor::new(HealthConfig::default()));
        invoker.attach_health(monitor.clone());

        let endpoint = dead_endpoint().await;
        let call = CallEnvelope::new(CorrelationId::generate(), "billing");
        let _ = invoker.call(&endpoint, call, None).await;

        assert!(monitor.is_tracked(&endpoint));
        assert_eq!(monitor.consecutive_failures(&endpoint), Some(1));
    }

    #[tokio::test]
    async fn test_unresolvable_service_target() {
        let registry = Arc::new(StaticAddressRegistry::new());
        let invoker = invoker().with_registry(registry);

        let call = CallEnvelope::new(CorrelationId::generate(), "billing");
        let err = invoker.call("billing", call, None).await.unwrap_err();
        assert!(matches!(err, StratusError::NoAddresses(_)));
    }

    #[tokio::test]
    async fn test_no_registry_attached() {
        let invoker = invoker();
        let call = CallEnvelope::new(CorrelationId::generate(), "billing");
        let err = invoker.call("billing", call, None).await.unwrap_err();
        assert!(matches!(err, StratusError::NoAddresses(_)));
    }

    #[tokio::test]
    async fn test_shutdown_fails_outstanding_calls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from(listener.local_addr().unwrap());

        // Peer accepts but never answers
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let invoker = Arc::new(invoker());
        let call = CallEnvelope::new(CorrelationId::generate(), "billing");

        let caller = {
            let invoker = invoker.clone();
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                invoker
                    .call(&endpoint, call, Some(Duration::from_secs(30)))
                    .await
            })
        };

        // Let the call get registered and sent
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(invoker.pending_calls(), 1);

        invoker.shutdown().await;

        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, StratusError::Communication(_)));
        assert_eq!(invoker.pending_calls(), 0);
    }
}
