//! # stratus-core
//!
//! Core types, traits, and error definitions for the Stratus RPC runtime.
//!
//! This crate provides:
//! - Error types (`StratusError`, `TransportError`, `CodecError`, `ServiceError`)
//! - Endpoint identity (`Endpoint`)
//! - Per-call context (`CallContext`, `CorrelationId`)
//! - Envelope types (`CallEnvelope`, `ResultEnvelope`, `WireMessage`)
//! - The `WireCodec` trait seam

mod codec;
mod context;
mod endpoint;
mod envelope;
mod error;

pub use codec::WireCodec;
pub use context::{Attachments, CallContext, CorrelationId};
pub use endpoint::{Endpoint, EndpointParseError};
pub use envelope::{
    ArchivedCallEnvelope, ArchivedResultEnvelope, ArchivedWireMessage, CallEnvelope,
    ResultEnvelope, StatusCode, WireMessage, PING_SERVICE_ID,
};
pub use error::{CodecError, ServiceError, StratusError, TransportError};
