//! Endpoint health monitoring with consecutive-failure hysteresis.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use stratus_core::{Endpoint, StratusError};

use crate::probe::{Prober, TcpProber};
use crate::registry::{AddressRegistry, RegistryEvent};

/// Health monitor configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval between probe cycles.
    pub probe_interval: Duration,

    /// Per-probe timeout.
    pub probe_timeout: Duration,

    /// Consecutive failures after which an endpoint is evicted.
    pub eviction_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(2),
            eviction_threshold: 6,
        }
    }
}

impl HealthConfig {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the probe interval.
    #[must_use]
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the per-probe timeout.
    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the eviction threshold.
    #[must_use]
    pub fn eviction_threshold(mut self, threshold: u32) -> Self {
        self.eviction_threshold = threshold;
        self
    }
}

/// Health state change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// An endpoint's health flipped.
    Changed {
        /// The endpoint.
        endpoint: Endpoint,
        /// New health state.
        healthy: bool,
    },
    /// An endpoint crossed the eviction threshold and left tracking.
    Removed {
        /// The endpoint.
        endpoint: Endpoint,
    },
}

/// Per-endpoint tracking state. `healthy` is `None` until the first
/// observation lands.
#[derive(Debug)]
struct MonitorEntry {
    healthy: Option<bool>,
    consecutive_failures: u32,
}

impl MonitorEntry {
    fn unknown() -> Self {
        Self {
            healthy: None,
            consecutive_failures: 0,
        }
    }
}

/// Tracks endpoint liveness and evicts persistently failing endpoints.
///
/// Every tracked endpoint is probed each cycle; a success resets the
/// consecutive-failure counter, a failure increments it, and crossing the
/// eviction threshold removes the endpoint and notifies the address
/// registry. Out-of-band call failures land through [`mark_failure`]
/// between cycles.
///
/// A `mark_failure` can race a passing probe; the entry simply reflects
/// whichever update lands last.
///
/// ## Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use stratus_health::{HealthConfig, HealthMonitor};
///
/// # async fn example() {
/// let monitor = Arc::new(HealthMonitor::new(HealthConfig::default()));
/// let handle = monitor.clone().spawn();
///
/// monitor.monitor("10.0.0.1:9000".parse().unwrap());
/// // ... probe cycles run in the background ...
///
/// monitor.shutdown();
/// # let _ = handle;
/// # }
/// ```
///
/// [`mark_failure`]: HealthMonitor::mark_failure
pub struct HealthMonitor {
    entries: DashMap<Endpoint, MonitorEntry>,
    prober: RwLock<Arc<dyn Prober>>,
    registry: RwLock<Option<Arc<dyn AddressRegistry>>>,
    events: broadcast::Sender<HealthEvent>,
    config: HealthConfig,
    stop: watch::Sender<bool>,
}

impl HealthMonitor {
    /// Create a new monitor with the transport-level fallback prober.
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let (stop, _) = watch::channel(false);
        Self {
            entries: DashMap::new(),
            prober: RwLock::new(Arc::new(TcpProber::new())),
            registry: RwLock::new(None),
            events,
            config,
            stop,
        }
    }

    /// Replace the prober (e.g. with the application-level ping probe).
    pub fn set_prober(&self, prober: Arc<dyn Prober>) {
        *self.prober.write() = prober;
    }

    /// Attach the address registry.
    ///
    /// The monitor pushes evicted endpoints to it and, once spawned,
    /// reacts to its change events. Attach before calling [`spawn`].
    ///
    /// [`spawn`]: HealthMonitor::spawn
    pub fn set_registry(&self, registry: Arc<dyn AddressRegistry>) {
        *self.registry.write() = Some(registry);
    }

    /// Subscribe to health change and removal events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Idempotently begin tracking an endpoint.
    pub fn monitor(&self, endpoint: Endpoint) {
        self.entries
            .entry(endpoint)
            .or_insert_with(MonitorEntry::unknown);
    }

    /// Whether an endpoint is currently tracked.
    #[must_use]
    pub fn is_tracked(&self, endpoint: &Endpoint) -> bool {
        self.entries.contains_key(endpoint)
    }

    /// Current consecutive-failure count for a tracked endpoint.
    #[must_use]
    pub fn consecutive_failures(&self, endpoint: &Endpoint) -> Option<u32> {
        self.entries
            .get(endpoint)
            .map(|e| e.consecutive_failures)
    }

    /// Number of tracked endpoints.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    /// Out-of-band failure signal from a failed call.
    ///
    /// Immediately marks the endpoint unhealthy without waiting for the
    /// next cycle. The signal participates in the consecutive-failure
    /// accounting; eviction still only happens through the threshold.
    pub fn mark_failure(&self, endpoint: &Endpoint) {
        tracing::debug!(%endpoint, "call failure reported");
        self.record_failure(endpoint);
    }

    /// Check whether an endpoint is healthy.
    ///
    /// An untracked (or not-yet-probed) endpoint gets an immediate one-shot
    /// probe and then enters tracking, rather than answering from a stale
    /// unknown state.
    pub async fn is_healthy(&self, endpoint: &Endpoint) -> bool {
        if let Some(entry) = self.entries.get(endpoint) {
            if let Some(healthy) = entry.healthy {
                return healthy;
            }
        }

        let result = self.probe_once(endpoint).await;
        self.apply_probe(endpoint, result);

        self.entries
            .get(endpoint)
            .is_some_and(|e| e.healthy == Some(true))
    }

    /// Run the monitor until [`shutdown`].
    ///
    /// [`shutdown`]: HealthMonitor::shutdown
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let stop = self.stop.subscribe();
        let registry_events = self.registry.read().as_ref().map(|r| r.subscribe());
        tokio::spawn(async move { self.run(stop, registry_events).await })
    }

    /// Stop the spawned probe cycle.
    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
    }

    async fn run(
        &self,
        mut stop: watch::Receiver<bool>,
        mut registry_events: Option<broadcast::Receiver<RegistryEvent>>,
    ) {
        let mut ticker = tokio::time::interval(self.config.probe_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.probe_cycle().await,
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        tracing::debug!("health monitor stopped");
                        return;
                    }
                }
                event = recv_registry(&mut registry_events) => {
                    if let Some(event) = event {
                        self.handle_registry_event(event);
                    }
                }
            }
        }
    }

    /// Probe every tracked endpoint concurrently and fold the results back
    /// into the entries.
    async fn probe_cycle(&self) {
        let endpoints: Vec<Endpoint> = self.entries.iter().map(|e| e.key().clone()).collect();
        if endpoints.is_empty() {
            return;
        }

        let probes = endpoints.into_iter().map(|endpoint| async move {
            let result = self.probe_once(&endpoint).await;
            (endpoint, result)
        });

        for (endpoint, result) in futures::future::join_all(probes).await {
            // Skip endpoints untracked mid-cycle by a registry event
            if !self.entries.contains_key(&endpoint) {
                continue;
            }
            self.apply_probe(&endpoint, result);
        }
    }

    async fn probe_once(&self, endpoint: &Endpoint) -> Result<(), StratusError> {
        let prober = self.prober.read().clone();
        prober
            .probe(endpoint.clone(), self.config.probe_timeout)
            .await
    }

    fn apply_probe(&self, endpoint: &Endpoint, result: Result<(), StratusError>) {
        match result {
            Ok(()) => self.record_success(endpoint),
            Err(e) => {
                tracing::debug!(%endpoint, error = %e, "probe failed");
                self.record_failure(endpoint);
            }
        }
    }

    fn record_success(&self, endpoint: &Endpoint) {
        let changed = {
            let mut entry = self
                .entries
                .entry(endpoint.clone())
                .or_insert_with(MonitorEntry::unknown);
            let changed = entry.healthy != Some(true);
            entry.healthy = Some(true);
            entry.consecutive_failures = 0;
            changed
        };

        if changed {
            tracing::debug!(%endpoint, "endpoint healthy");
            let _ = self.events.send(HealthEvent::Changed {
                endpoint: endpoint.clone(),
                healthy: true,
            });
        }
    }

    fn record_failure(&self, endpoint: &Endpoint) {
        let (changed, evict) = {
            let mut entry = self
                .entries
                .entry(endpoint.clone())
                .or_insert_with(MonitorEntry::unknown);
            let changed = entry.healthy != Some(false);
            entry.healthy = Some(false);
            entry.consecutive_failures += 1;
            (
                changed,
                entry.consecutive_failures >= self.config.eviction_threshold,
            )
        };

        if changed {
            let _ = self.events.send(HealthEvent::Changed {
                endpoint: endpoint.clone(),
                healthy: false,
            });
        }

        if evict {
            self.evict(endpoint);
        }
    }

    /// Terminal transition: stop tracking and tell the registry to drop the
    /// endpoint from routing. The removal notification fires exactly once
    /// even under racing failure signals.
    fn evict(&self, endpoint: &Endpoint) {
        if self.entries.remove(endpoint).is_none() {
            return;
        }

        tracing::warn!(%endpoint, "endpoint evicted after consecutive failures");
        let _ = self.events.send(HealthEvent::Removed {
            endpoint: endpoint.clone(),
        });

        let registry = self.registry.read().clone();
        if let Some(registry) = registry {
            registry.remove_addresses(std::slice::from_ref(endpoint));
        }
    }

    fn handle_registry_event(&self, event: RegistryEvent) {
        match event {
            RegistryEvent::Created { endpoints, .. } | RegistryEvent::Changed { endpoints, .. } => {
                for endpoint in endpoints {
                    self.monitor(endpoint);
                }
            }
            RegistryEvent::Removed { service, endpoints } => {
                for endpoint in endpoints {
                    if self.entries.remove(&endpoint).is_some() {
                        tracing::debug!(%endpoint, %service, "stopped tracking removed endpoint");
                    }
                }
            }
        }
    }
}

async fn recv_registry(
    rx: &mut Option<broadcast::Receiver<RegistryEvent>>,
) -> Option<RegistryEvent> {
    match rx {
        Some(receiver) => match receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "lagged behind registry events");
                None
            }
            Err(broadcast::error::RecvError::Closed) => {
                *rx = None;
                None
            }
        },
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StaticAddressRegistry;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn ep(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    /// Prober whose outcome is flipped by tests.
    struct ScriptedProber {
        up: AtomicBool,
    }

    impl ScriptedProber {
        fn new(up: bool) -> Arc<Self> {
            Arc::new(Self {
                up: AtomicBool::new(up),
            })
        }

        fn set_up(&self, up: bool) {
            self.up.store(up, Ordering::SeqCst);
        }
    }

    impl Prober for ScriptedProber {
        fn probe(
            &self,
            _endpoint: Endpoint,
            timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<(), StratusError>> + Send + '_>> {
            Box::pin(async move {
                if self.up.load(Ordering::SeqCst) {
                    Ok(())
                } else {
                    Err(StratusError::Timeout(timeout))
                }
            })
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = HealthConfig::default();
        assert_eq!(config.probe_interval, Duration::from_secs(10));
        assert_eq!(config.probe_timeout, Duration::from_secs(2));
        assert_eq!(config.eviction_threshold, 6);
    }

    #[tokio::test]
    async fn test_monitor_is_idempotent() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        monitor.monitor(ep("10.0.0.1:9000"));
        monitor.monitor(ep("10.0.0.1:9000"));
        assert_eq!(monitor.tracked_count(), 1);
        assert_eq!(monitor.consecutive_failures(&ep("10.0.0.1:9000")), Some(0));
    }

    #[tokio::test]
    async fn test_mark_failure_flips_health_and_counts() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        monitor.set_prober(ScriptedProber::new(true));
        let mut events = monitor.subscribe();

        let endpoint = ep("10.0.0.1:9000");
        monitor.monitor(endpoint.clone());
        assert!(monitor.is_healthy(&endpoint).await);
        assert!(matches!(
            events.recv().await.unwrap(),
            HealthEvent::Changed { healthy: true, .. }
        ));

        monitor.mark_failure(&endpoint);
        assert!(!monitor.is_healthy(&endpoint).await);
        assert_eq!(monitor.consecutive_failures(&endpoint), Some(1));
        assert!(matches!(
            events.recv().await.unwrap(),
            HealthEvent::Changed { healthy: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_success_before_threshold_resets_counter() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        let endpoint = ep("10.0.0.1:9000");
        monitor.monitor(endpoint.clone());

        // 5 failed probes, then one success
        for _ in 0..5 {
            monitor.apply_probe(&endpoint, Err(StratusError::Cancelled));
        }
        assert_eq!(monitor.consecutive_failures(&endpoint), Some(5));
        assert!(monitor.is_tracked(&endpoint));

        monitor.apply_probe(&endpoint, Ok(()));
        assert!(monitor.is_tracked(&endpoint));
        assert_eq!(monitor.consecutive_failures(&endpoint), Some(0));
        assert!(monitor.is_healthy(&endpoint).await);
    }

    #[tokio::test]
    async fn test_eviction_at_threshold_fires_removed_once() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        let registry = Arc::new(StaticAddressRegistry::new());
        let endpoint = ep("10.0.0.1:9000");
        registry.add_service("billing", vec![endpoint.clone()]);
        monitor.set_registry(registry.clone());

        let mut events = monitor.subscribe();
        monitor.monitor(endpoint.clone());

        for _ in 0..6 {
            monitor.apply_probe(&endpoint, Err(StratusError::Cancelled));
        }

        assert!(!monitor.is_tracked(&endpoint));
        // Registry learned about the eviction
        assert!(registry.addresses_for("billing").is_empty());

        let mut removed = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, HealthEvent::Removed { .. }) {
                removed += 1;
            }
        }
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_is_healthy_probes_untracked_endpoint() {
        let monitor = HealthMonitor::new(HealthConfig::default());
        monitor.set_prober(ScriptedProber::new(true));

        let endpoint = ep("10.0.0.7:9000");
        assert!(!monitor.is_tracked(&endpoint));
        assert!(monitor.is_healthy(&endpoint).await);
        assert!(monitor.is_tracked(&endpoint));

        let down = ep("10.0.0.8:9000");
        monitor.set_prober(ScriptedProber::new(false));
        assert!(!monitor.is_healthy(&down).await);
        assert!(monitor.is_tracked(&down));
        assert_eq!(monitor.consecutive_failures(&down), Some(1));
    }

    #[tokio::test]
    async fn test_registry_events_drive_tracking() {
        let monitor = HealthMonitor::new(HealthConfig::default());

        monitor.handle_registry_event(RegistryEvent::Created {
            service: "billing".into(),
            endpoints: vec![ep("10.0.0.1:9000"), ep("10.0.0.2:9000")],
        });
        assert_eq!(monitor.tracked_count(), 2);

        monitor.handle_registry_event(RegistryEvent::Removed {
            service: "billing".into(),
            endpoints: vec![ep("10.0.0.1:9000")],
        });
        assert!(!monitor.is_tracked(&ep("10.0.0.1:9000")));
        assert!(monitor.is_tracked(&ep("10.0.0.2:9000")));
    }

    #[tokio::test]
    async fn test_spawned_cycle_evicts_dead_endpoint() {
        let prober = ScriptedProber::new(false);
        let monitor = Arc::new(
            HealthMonitor::new(
                HealthConfig::new()
                    .probe_interval(Duration::from_millis(10))
                    .eviction_threshold(3),
            ),
        );
        monitor.set_prober(prober);

        let mut events = monitor.subscribe();
        let endpoint = ep("10.0.0.1:9000");
        monitor.monitor(endpoint.clone());

        let handle = monitor.clone().spawn();

        // Wait for the Removed event rather than sleeping a fixed time
        let removed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match events.recv().await {
                    Ok(HealthEvent::Removed { endpoint }) => break endpoint,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream ended: {e}"),
                }
            }
        })
        .await
        .expect("eviction did not happen in time");

        assert_eq!(removed, endpoint);
        assert!(!monitor.is_tracked(&endpoint));

        monitor.shutdown();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_spawned_monitor_reacts_to_registry_events() {
        let monitor = Arc::new(HealthMonitor::new(
            HealthConfig::new().probe_interval(Duration::from_secs(60)),
        ));
        monitor.set_prober(ScriptedProber::new(true));

        let registry = Arc::new(StaticAddressRegistry::new());
        monitor.set_registry(registry.clone());
        let handle = monitor.clone().spawn();

        registry.add_service("search", vec![ep("10.0.1.1:7000")]);

        // The event is consumed by the spawned task
        tokio::time::timeout(Duration::from_secs(2), async {
            while !monitor.is_tracked(&ep("10.0.1.1:7000")) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registry event was not handled");

        monitor.shutdown();
        let _ = handle.await;
    }
}
