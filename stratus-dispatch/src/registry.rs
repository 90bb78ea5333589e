//! Explicit service registration.
//!
//! Handlers are bound to service ids and route paths at startup through
//! this registry; lookup never involves runtime type scanning.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;

use stratus_core::{CallContext, CallEnvelope, ServiceError, PING_SERVICE_ID};

/// Trait for local service handlers.
///
/// A handler receives the reconstructed per-call context (attachments,
/// correlation id, opaque service key) and the call envelope, and produces
/// a result payload or a [`ServiceError`] whose causal chain is surfaced to
/// the caller.
pub trait ServiceHandler: Send + Sync + 'static {
    /// Execute one call.
    fn invoke(
        &self,
        ctx: CallContext,
        call: CallEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, ServiceError>> + Send + '_>>;
}

struct FnHandler<F>(F);

impl<F, Fut> ServiceHandler for FnHandler<F>
where
    F: Fn(CallContext, CallEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, ServiceError>> + Send + 'static,
{
    fn invoke(
        &self,
        ctx: CallContext,
        call: CallEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, ServiceError>> + Send + '_>> {
        Box::pin((self.0)(ctx, call))
    }
}

/// Wrap an async closure as a [`ServiceHandler`].
///
/// ## Example
///
/// ```rust
/// use stratus_dispatch::handler_fn;
///
/// let echo = handler_fn(|_ctx, call: stratus_core::CallEnvelope| async move {
///     Ok(call.parameter("payload").unwrap_or_default().to_vec())
/// });
/// # drop(echo);
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ServiceHandler>
where
    F: Fn(CallContext, CallEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, ServiceError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Registration record binding a service id and route path to a handler
/// and its execution policy. Read-only once registered.
pub struct ServiceEntry {
    id: String,
    route_path: String,
    wait_for_execution: bool,
    handler: Arc<dyn ServiceHandler>,
}

impl ServiceEntry {
    /// Create an entry that replies after the handler completes.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        route_path: impl Into<String>,
        handler: Arc<dyn ServiceHandler>,
    ) -> Self {
        Self {
            id: id.into(),
            route_path: route_path.into(),
            wait_for_execution: true,
            handler,
        }
    }

    /// Switch the entry to fire-and-forget: the caller is acknowledged
    /// before the handler runs.
    #[must_use]
    pub fn fire_and_forget(mut self) -> Self {
        self.wait_for_execution = false;
        self
    }

    /// The service id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The route path.
    #[must_use]
    pub fn route_path(&self) -> &str {
        &self.route_path
    }

    /// Whether the reply waits for handler completion.
    #[must_use]
    pub fn wait_for_execution(&self) -> bool {
        self.wait_for_execution
    }

    /// The handler.
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn ServiceHandler> {
        &self.handler
    }
}

/// Registry of local service entries, addressable by id or route path.
///
/// The built-in ping entry answering health probes is registered on
/// construction.
pub struct ServiceRegistry {
    by_id: DashMap<String, Arc<ServiceEntry>>,
    by_route: DashMap<String, Arc<ServiceEntry>>,
}

impl ServiceRegistry {
    /// Create a registry with the built-in ping entry.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self {
            by_id: DashMap::new(),
            by_route: DashMap::new(),
        };
        registry.register(ServiceEntry::new(
            PING_SERVICE_ID,
            "/_ping",
            handler_fn(|_ctx, _call| async { Ok(Vec::new()) }),
        ));
        registry
    }

    /// Register an entry, replacing any previous one under the same id or
    /// route.
    pub fn register(&self, entry: ServiceEntry) {
        let entry = Arc::new(entry);
        self.by_id.insert(entry.id().to_string(), entry.clone());
        self.by_route
            .insert(entry.route_path().to_string(), entry);
    }

    /// Look up an entry by service id.
    #[must_use]
    pub fn lookup_id(&self, service_id: &str) -> Option<Arc<ServiceEntry>> {
        self.by_id.get(service_id).map(|e| e.clone())
    }

    /// Look up an entry by route path.
    #[must_use]
    pub fn lookup_route(&self, route_path: &str) -> Option<Arc<ServiceEntry>> {
        self.by_route.get(route_path).map(|e| e.clone())
    }

    /// Look up by id, falling back to route path.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<Arc<ServiceEntry>> {
        self.lookup_id(key).or_else(|| self.lookup_route(key))
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
