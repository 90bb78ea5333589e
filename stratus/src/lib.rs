//! # Stratus
//!
//! Health-aware connection and invocation layer for RPC micro-services.
//!
//! Stratus lets a process call named services hosted on other processes,
//! keeps track of which remote endpoints are alive, and routes incoming
//! calls to local handlers:
//!
//! - **Correlation** - replies are matched to calls solely by correlation
//!   id over shared connections
//! - **Connection cache** - at most one live connection per endpoint,
//!   single-flighted under concurrent first use, evicted on send failure
//! - **Health monitoring** - periodic probing with consecutive-failure
//!   hysteresis, eviction notifications, and out-of-band failure signals
//! - **Dispatch** - explicit service registration, wait-for-completion or
//!   fire-and-forget execution, exception-chain capture
//!
//! ## Quick Start
//!
//! ```rust
//! use stratus::{CallContext, CallEnvelope, CorrelationId, Endpoint};
//!
//! // Endpoints identify remote processes
//! let endpoint: Endpoint = "10.0.0.1:9000".parse().unwrap();
//! assert_eq!(endpoint.port(), 9000);
//!
//! // Calls carry a caller-generated correlation id
//! let call = CallEnvelope::new(CorrelationId::generate(), "billing")
//!     .param("invoice", b"INV-1".to_vec())
//!     .attach("tenant", "acme");
//! assert_eq!(call.service_id, "billing");
//!
//! // Contexts bound every call with a deadline
//! let ctx = CallContext::with_timeout(std::time::Duration::from_secs(5));
//! assert!(ctx.deadline.is_some());
//! ```
//!
//! ## Architecture
//!
//! Stratus is composed of several crates:
//!
//! - [`stratus-core`](stratus_core) - Core types, traits, and error definitions
//! - [`stratus-codec`](stratus_codec) - Framing and the default envelope codec
//! - [`stratus-transport`](stratus_transport) - Correlation, connection cache, invoker
//! - [`stratus-health`](stratus_health) - Health monitoring and the registry seam
//! - [`stratus-dispatch`](stratus_dispatch) - Server-side dispatch and execution

// Re-export core types
pub use stratus_core::{
    Attachments, CallContext, CallEnvelope, CodecError, CorrelationId, Endpoint,
    EndpointParseError, ResultEnvelope, ServiceError, StatusCode, StratusError, TransportError,
    WireCodec, WireMessage, PING_SERVICE_ID,
};

// Re-export codec
pub use stratus_codec::{EnvelopeCodec, FrameCodec, DEFAULT_MAX_FRAME_SIZE};

// Re-export transport
pub use stratus_transport::{
    CallTarget, ConnectConfig, Connection, ConnectionCache, InvokerConfig, Multiplexer,
    PendingCall, RemoteInvoker, RpcProber,
};

// Re-export health
pub use stratus_health::{
    AddressRegistry, HealthConfig, HealthEvent, HealthMonitor, Prober, RegistryEvent,
    StaticAddressRegistry, TcpProber,
};

// Re-export dispatch
pub use stratus_dispatch::{
    exception_chain, handler_fn, Dispatcher, ReplySink, Server, ServerConfig, ServerHandle,
    ServiceEntry, ServiceHandler, ServiceRegistry,
};
