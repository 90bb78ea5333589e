//! The per-endpoint connection cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use stratus_core::{Endpoint, TransportError, WireCodec};

use crate::conn::{ConnectConfig, Connection};
use crate::mux::Multiplexer;

/// Per-endpoint slot. The async mutex single-flights construction: under N
/// concurrent first users exactly one performs the handshake, the rest
/// share the winner's handle.
#[derive(Default)]
struct Slot {
    current: async_lock::Mutex<Option<Arc<Connection>>>,
}

/// Cache holding at most one live connection per endpoint.
///
/// Connections are created lazily on first use and shared by all concurrent
/// callers targeting that endpoint. A send failure evicts the handle so the
/// next call rebuilds a fresh connection; a construction failure leaves the
/// slot empty and never blocks subsequent attempts.
///
/// ## Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use stratus_codec::EnvelopeCodec;
/// use stratus_transport::{ConnectionCache, Multiplexer};
/// use stratus_transport::ConnectConfig;
///
/// # async fn example() -> Result<(), stratus_core::TransportError> {
/// let mux = Arc::new(Multiplexer::new());
/// let cache = ConnectionCache::new(ConnectConfig::default(), Arc::new(EnvelopeCodec::new()), mux);
///
/// let endpoint = "127.0.0.1:9000".parse().unwrap();
/// let conn = cache.get_or_create(&endpoint).await?;
/// # drop(conn);
/// # Ok(())
/// # }
/// ```
pub struct ConnectionCache {
    slots: DashMap<Endpoint, Arc<Slot>>,
    config: ConnectConfig,
    wire: Arc<dyn WireCodec>,
    mux: Arc<Multiplexer>,
    closed: AtomicBool,
}

impl ConnectionCache {
    /// Create a new cache.
    ///
    /// Inbound result envelopes on every cached connection are resolved
    /// into `mux`.
    #[must_use]
    pub fn new(config: ConnectConfig, wire: Arc<dyn WireCodec>, mux: Arc<Multiplexer>) -> Self {
        Self {
            slots: DashMap::new(),
            config,
            wire,
            mux,
            closed: AtomicBool::new(false),
        }
    }

    /// Get the live connection for an endpoint, creating it if needed.
    pub async fn get_or_create(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Arc<Connection>, TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionClosed);
        }

        let slot = self
            .slots
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(Slot::default()))
            .clone();

        let mut current = slot.current.lock().await;

        if let Some(conn) = current.as_ref() {
            if conn.is_open() {
                return Ok(conn.clone());
            }
            // Stale handle left by a peer-side close; rebuild below
        }

        let conn = Connection::connect(
            endpoint.clone(),
            &self.config,
            self.wire.clone(),
            self.mux.clone(),
        )
        .await?;

        *current = Some(conn.clone());
        Ok(conn)
    }

    /// Evict and close the cached connection for an endpoint.
    ///
    /// Called on send failure so the next call rebuilds a fresh connection.
    pub async fn evict(&self, endpoint: &Endpoint) {
        let slot = match self.slots.get(endpoint) {
            Some(slot) => slot.clone(),
            None => return,
        };

        let mut current = slot.current.lock().await;
        if let Some(conn) = current.take() {
            conn.close();
            tracing::debug!(%endpoint, "evicted connection");
        }
    }

    /// Close every cached connection and reject further use.
    pub async fn dispose(&self) {
        self.closed.store(true, Ordering::Relaxed);

        let slots: Vec<Arc<Slot>> = self.slots.iter().map(|e| e.value().clone()).collect();
        self.slots.clear();

        for slot in slots {
            let mut current = slot.current.lock().await;
            if let Some(conn) = current.take() {
                conn.close();
            }
        }
    }
}
