//! Address registry seam.
//!
//! The registry is an external collaborator: it owns the mapping from
//! service ids to endpoints and learns about evictions from the health
//! monitor. `StaticAddressRegistry` is the in-memory implementation used
//! for fixed topologies and tests.

use dashmap::DashMap;
use tokio::sync::broadcast;

use stratus_core::Endpoint;

/// Change notification carrying the affected endpoints.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A service was registered with these endpoints.
    Created {
        /// Service id.
        service: String,
        /// Endpoints now hosting the service.
        endpoints: Vec<Endpoint>,
    },
    /// A service's endpoint set changed.
    Changed {
        /// Service id.
        service: String,
        /// Endpoints now hosting the service.
        endpoints: Vec<Endpoint>,
    },
    /// A service was removed.
    Removed {
        /// Service id.
        service: String,
        /// Endpoints that hosted the service.
        endpoints: Vec<Endpoint>,
    },
}

/// Trait for address registries.
///
/// Change notification goes through an explicit broadcast subscription so
/// ordering and unsubscription are deterministic.
pub trait AddressRegistry: Send + Sync + 'static {
    /// Endpoints currently hosting a service.
    fn addresses_for(&self, service_id: &str) -> Vec<Endpoint>;

    /// Whether any registered service claims this endpoint.
    fn claims(&self, endpoint: &Endpoint) -> bool;

    /// Drop endpoints from every service they appear under (health
    /// eviction path).
    fn remove_addresses(&self, endpoints: &[Endpoint]);

    /// Subscribe to change events.
    fn subscribe(&self) -> broadcast::Receiver<RegistryEvent>;
}

/// A static in-memory address registry.
///
/// ## Example
///
/// ```rust
/// use stratus_health::{AddressRegistry, StaticAddressRegistry};
///
/// let registry = StaticAddressRegistry::new();
/// registry.add_service("billing", vec!["10.0.0.1:9000".parse().unwrap()]);
///
/// let addrs = registry.addresses_for("billing");
/// assert_eq!(addrs.len(), 1);
/// ```
pub struct StaticAddressRegistry {
    services: DashMap<String, Vec<Endpoint>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl StaticAddressRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            services: DashMap::new(),
            events,
        }
    }

    /// Register a service with its endpoints, replacing any previous set.
    pub fn add_service(&self, service: impl Into<String>, endpoints: Vec<Endpoint>) {
        let service = service.into();
        let previous = self.services.insert(service.clone(), endpoints.clone());

        let event = if previous.is_some() {
            RegistryEvent::Changed {
                service,
                endpoints,
            }
        } else {
            RegistryEvent::Created {
                service,
                endpoints,
            }
        };
        let _ = self.events.send(event);
    }

    /// Remove a service entirely.
    pub fn remove_service(&self, service: &str) {
        if let Some((service, endpoints)) = self.services.remove(service) {
            let _ = self.events.send(RegistryEvent::Removed { service, endpoints });
        }
    }
}

impl Default for StaticAddressRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressRegistry for StaticAddressRegistry {
    fn addresses_for(&self, service_id: &str) -> Vec<Endpoint> {
        self.services
            .get(service_id)
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    fn claims(&self, endpoint: &Endpoint) -> bool {
        self.services
            .iter()
            .any(|entry| entry.value().contains(endpoint))
    }

    fn remove_addresses(&self, endpoints: &[Endpoint]) {
        for mut entry in self.services.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|ep| !endpoints.contains(ep));

            if entry.value().len() != before {
                let _ = self.events.send(RegistryEvent::Changed {
                    service: entry.key().clone(),
                    endpoints: entry.value().clone(),
                });
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }
}
