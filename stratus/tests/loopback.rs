//! End-to-end tests driving a real client/server pair over loopback TCP.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use stratus::{
    handler_fn, AddressRegistry, CallEnvelope, CorrelationId, Dispatcher, Endpoint, EnvelopeCodec, HealthConfig,
    HealthEvent, HealthMonitor, InvokerConfig, RemoteInvoker, RpcProber, Server, ServerConfig,
    ServerHandle, ServiceEntry, ServiceError, ServiceRegistry, StaticAddressRegistry, StatusCode,
    StratusError,
};

struct Cluster {
    server: ServerHandle,
    invoker: Arc<RemoteInvoker>,
    endpoint: Endpoint,
}

impl Cluster {
    async fn start(registry: Arc<ServiceRegistry>) -> Self {
        let server = Server::new(
            ServerConfig::new().bind_addr("127.0.0.1:0"),
            Arc::new(Dispatcher::new(registry)),
            Arc::new(EnvelopeCodec::new()),
        )
        .bind()
        .await
        .unwrap();

        let endpoint = Endpoint::from(server.local_addr());
        let invoker = Arc::new(RemoteInvoker::new(
            InvokerConfig::default(),
            Arc::new(EnvelopeCodec::new()),
        ));

        Self {
            server,
            invoker,
            endpoint,
        }
    }

    async fn stop(self) {
        self.invoker.shutdown().await;
        self.server.shutdown();
        self.server.join().await;
    }
}

fn echo_registry() -> Arc<ServiceRegistry> {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(ServiceEntry::new(
        "echo",
        "/echo",
        handler_fn(|_ctx, call: CallEnvelope| async move {
            Ok(call.parameter("payload").unwrap_or_default().to_vec())
        }),
    ));
    registry
}

fn call(service: &str) -> CallEnvelope {
    CallEnvelope::new(CorrelationId::generate(), service)
}

#[tokio::test]
async fn call_round_trip() {
    let cluster = Cluster::start(echo_registry()).await;

    let reply = cluster
        .invoker
        .call(
            &cluster.endpoint,
            call("echo").param("payload", b"over the wire".to_vec()),
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();

    assert_eq!(reply.payload, Some(b"over the wire".to_vec()));
    assert_eq!(reply.status_code(), StatusCode::Ok);
    assert_eq!(cluster.invoker.pending_calls(), 0);

    cluster.stop().await;
}

#[tokio::test]
async fn remote_failure_carries_exception_chain() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(ServiceEntry::new(
        "flaky",
        "/flaky",
        handler_fn(|_ctx, _call| async {
            let c = std::io::Error::other("C");
            let b = ServiceError::internal("B").with_source(c);
            Err(ServiceError::new(StatusCode::Internal, "A").with_source(b))
        }),
    ));
    let cluster = Cluster::start(registry).await;

    let err = cluster
        .invoker
        .call(&cluster.endpoint, call("flaky"), Some(Duration::from_secs(2)))
        .await
        .unwrap_err();

    match err {
        StratusError::Remote { message, status } => {
            assert_eq!(message, "A | B | C");
            assert_eq!(status, StatusCode::Internal);
        }
        other => panic!("expected remote failure, got {other}"),
    }

    cluster.stop().await;
}

#[tokio::test]
async fn deadline_bounds_slow_handler() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(ServiceEntry::new(
        "slow",
        "/slow",
        handler_fn(|_ctx, _call| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(Vec::new())
        }),
    ));
    let cluster = Cluster::start(registry).await;

    let started = Instant::now();
    let err = cluster
        .invoker
        .call(&cluster.endpoint, call("slow"), Some(Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert!(matches!(err, StratusError::Timeout(_)));
    assert!(
        started.elapsed() < Duration::from_millis(300),
        "timeout fired late: {:?}",
        started.elapsed()
    );
    // No correlation entry may survive the timeout
    assert_eq!(cluster.invoker.pending_calls(), 0);

    cluster.stop().await;
}

#[tokio::test]
async fn fire_and_forget_acks_before_execution_completes() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();

    let registry = Arc::new(ServiceRegistry::new());
    registry.register(
        ServiceEntry::new(
            "audit",
            "/audit",
            handler_fn(move |_ctx, _call| {
                let flag = flag.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(Vec::new())
                }
            }),
        )
        .fire_and_forget(),
    );
    let cluster = Cluster::start(registry).await;

    let reply = cluster
        .invoker
        .call(&cluster.endpoint, call("audit"), Some(Duration::from_secs(2)))
        .await
        .unwrap();

    // The ack resolved before the handler's own execution completed
    assert!(reply.payload.is_none());
    assert!(!finished.load(Ordering::SeqCst));

    // The detached execution still finishes
    tokio::time::timeout(Duration::from_secs(1), async {
        while !finished.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("detached handler never completed");

    cluster.stop().await;
}

#[tokio::test]
async fn concurrent_calls_resolve_out_of_send_order() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(ServiceEntry::new(
        "slow",
        "/slow",
        handler_fn(|_ctx, _call| async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(b"slow".to_vec())
        }),
    ));
    registry.register(ServiceEntry::new(
        "fast",
        "/fast",
        handler_fn(|_ctx, _call| async { Ok(b"fast".to_vec()) }),
    ));
    let cluster = Cluster::start(registry).await;

    // Send the slow call first; its reply arrives after the fast one on
    // the same shared connection
    let slow = cluster
        .invoker
        .call(&cluster.endpoint, call("slow"), Some(Duration::from_secs(2)));
    let fast = cluster
        .invoker
        .call(&cluster.endpoint, call("fast"), Some(Duration::from_secs(2)));

    let (slow_reply, fast_reply) = tokio::join!(slow, fast);
    assert_eq!(slow_reply.unwrap().payload, Some(b"slow".to_vec()));
    assert_eq!(fast_reply.unwrap().payload, Some(b"fast".to_vec()));
    assert_eq!(cluster.invoker.pending_calls(), 0);

    cluster.stop().await;
}

#[tokio::test]
async fn duplicate_correlation_id_fails_fast() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(ServiceEntry::new(
        "slow",
        "/slow",
        handler_fn(|_ctx, _call| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(Vec::new())
        }),
    ));
    let cluster = Cluster::start(registry).await;

    let id = CorrelationId::generate();
    let first = {
        let invoker = cluster.invoker.clone();
        let endpoint = cluster.endpoint.clone();
        let envelope = CallEnvelope::new(id.clone(), "slow");
        tokio::spawn(async move {
            invoker
                .call(&endpoint, envelope, Some(Duration::from_secs(2)))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = cluster
        .invoker
        .call(
            &cluster.endpoint,
            CallEnvelope::new(id, "slow"),
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StratusError::DuplicateCorrelationId(_)));

    // The original call is unaffected
    assert!(first.await.unwrap().is_ok());

    cluster.stop().await;
}

#[tokio::test]
async fn unknown_service_resolves_as_timeout() {
    let cluster = Cluster::start(echo_registry()).await;

    let err = cluster
        .invoker
        .call(
            &cluster.endpoint,
            call("nonexistent"),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StratusError::Timeout(_)));
    assert_eq!(cluster.invoker.pending_calls(), 0);

    cluster.stop().await;
}

#[tokio::test]
async fn service_id_targets_resolve_through_the_registry() {
    let addresses = Arc::new(StaticAddressRegistry::new());
    let registry = echo_registry();

    let server = Server::new(
        ServerConfig::new().bind_addr("127.0.0.1:0"),
        Arc::new(Dispatcher::new(registry)),
        Arc::new(EnvelopeCodec::new()),
    )
    .bind()
    .await
    .unwrap();
    let endpoint = Endpoint::from(server.local_addr());
    addresses.add_service("echo", vec![endpoint]);

    let invoker = RemoteInvoker::new(InvokerConfig::default(), Arc::new(EnvelopeCodec::new()))
        .with_registry(addresses);

    let reply = invoker
        .call(
            "echo",
            call("echo").param("payload", b"by name".to_vec()),
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();
    assert_eq!(reply.payload, Some(b"by name".to_vec()));

    invoker.shutdown().await;
    server.shutdown();
    server.join().await;
}

#[tokio::test]
async fn application_probe_sees_live_server_healthy() {
    let cluster = Cluster::start(echo_registry()).await;

    let addresses = Arc::new(StaticAddressRegistry::new());
    addresses.add_service("echo", vec![cluster.endpoint.clone()]);

    let monitor = Arc::new(HealthMonitor::new(HealthConfig::default()));
    monitor.set_registry(addresses.clone());
    monitor.set_prober(Arc::new(RpcProber::new(&cluster.invoker, addresses.clone())));
    cluster.invoker.attach_health(monitor.clone());

    // Claimed endpoint: the probe goes through the built-in ping service
    assert!(monitor.is_healthy(&cluster.endpoint).await);
    assert!(monitor.is_tracked(&cluster.endpoint));

    // A claimed but dead endpoint probes unhealthy
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        Endpoint::from(listener.local_addr().unwrap())
    };
    addresses.add_service("ghost", vec![dead.clone()]);
    assert!(!monitor.is_healthy(&dead).await);
    assert_eq!(monitor.consecutive_failures(&dead), Some(1));

    cluster.stop().await;
}

#[tokio::test]
async fn persistent_probe_failures_evict_and_notify_registry() {
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        Endpoint::from(listener.local_addr().unwrap())
    };

    let addresses = Arc::new(StaticAddressRegistry::new());
    addresses.add_service("ghost", vec![dead.clone()]);

    let invoker = Arc::new(RemoteInvoker::new(
        InvokerConfig::default(),
        Arc::new(EnvelopeCodec::new()),
    ));

    let monitor = Arc::new(HealthMonitor::new(
        HealthConfig::new()
            .probe_interval(Duration::from_millis(20))
            .probe_timeout(Duration::from_millis(200))
            .eviction_threshold(3),
    ));
    monitor.set_registry(addresses.clone());
    monitor.set_prober(Arc::new(RpcProber::new(&invoker, addresses.clone())));

    let mut events = monitor.subscribe();
    monitor.monitor(dead.clone());
    let handle = monitor.clone().spawn();

    let removed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.unwrap() {
                HealthEvent::Removed { endpoint } => break endpoint,
                HealthEvent::Changed { .. } => continue,
            }
        }
    })
    .await
    .expect("eviction did not happen in time");

    assert_eq!(removed, dead);
    assert!(!monitor.is_tracked(&dead));
    // The registry dropped the endpoint from routing
    assert!(addresses.addresses_for("ghost").is_empty());

    monitor.shutdown();
    let _ = handle.await;
    invoker.shutdown().await;
}

#[tokio::test]
async fn failed_call_reports_to_health_and_recovers_after_restart() {
    let cluster = Cluster::start(echo_registry()).await;

    let monitor = Arc::new(HealthMonitor::new(HealthConfig::default()));
    cluster.invoker.attach_health(monitor.clone());

    // A dead endpoint: the call fails with a communication error and the
    // monitor hears about it out of band
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        Endpoint::from(listener.local_addr().unwrap())
    };
    let err = cluster
        .invoker
        .call(&dead, call("echo"), Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, StratusError::Communication(_)));
    assert_eq!(monitor.consecutive_failures(&dead), Some(1));

    // The live endpoint keeps working through the same invoker: the next
    // call builds a fresh connection where needed
    let reply = cluster
        .invoker
        .call(
            &cluster.endpoint,
            call("echo").param("payload", b"still alive".to_vec()),
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();
    assert_eq!(reply.payload, Some(b"still alive".to_vec()));

    cluster.stop().await;
}
