//! Call and result envelope types.
//!
//! These types define the message model exchanged between an invoker and a
//! dispatcher, serialized by a `WireCodec` implementation. Once encoded,
//! both envelope kinds are opaque byte payloads to the rest of the runtime.

use rkyv::{Archive, Deserialize, Serialize};

use crate::context::{Attachments, CorrelationId};

/// Service id of the built-in no-op service every dispatcher answers;
/// used by health probes as a lightweight application-level liveness check.
pub const PING_SERVICE_ID: &str = "_ping";

/// Stable status codes carried on result envelopes.
///
/// The numeric values are fixed wire contract; unknown values decode to
/// [`StatusCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StatusCode {
    /// Call completed normally.
    Ok = 0,
    /// Call was cancelled.
    Cancelled = 1,
    /// Unclassified failure.
    Unknown = 2,
    /// Caller supplied an invalid argument.
    InvalidArgument = 3,
    /// Deadline expired before completion.
    DeadlineExceeded = 4,
    /// Requested entity was not found.
    NotFound = 5,
    /// Handler raised an internal error.
    Internal = 13,
    /// Target service is unavailable.
    Unavailable = 14,
}

impl StatusCode {
    /// Decode a wire value, mapping unrecognized codes to `Unknown`.
    #[must_use]
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            13 => Self::Internal,
            14 => Self::Unavailable,
            _ => Self::Unknown,
        }
    }

    /// The wire value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
            Self::InvalidArgument => "invalid-argument",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::NotFound => "not-found",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
        };
        write!(f, "{name} ({})", self.as_u32())
    }
}

/// An outbound call to a named service.
///
/// Immutable after send. Parameters keep their insertion order; attachments
/// are copied into the server-side [`crate::CallContext`] for the duration
/// of one dispatch.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub struct CallEnvelope {
    /// Correlation id matching the eventual reply.
    pub correlation_id: CorrelationId,

    /// Target service identifier.
    pub service_id: String,

    /// Optional opaque sub-target key.
    pub service_key: Option<String>,

    /// Ordered (name, bytes) call parameters.
    pub parameters: Vec<(String, Vec<u8>)>,

    /// Key-value attachments propagated into the handler's context.
    pub attachments: Vec<(String, String)>,
}

impl CallEnvelope {
    /// Create a new call envelope.
    #[must_use]
    pub fn new(correlation_id: CorrelationId, service_id: impl Into<String>) -> Self {
        Self {
            correlation_id,
            service_id: service_id.into(),
            service_key: None,
            parameters: Vec::new(),
            attachments: Vec::new(),
        }
    }

    /// Set the opaque service key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.service_key = Some(key.into());
        self
    }

    /// Append a named parameter, preserving insertion order.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    /// Append an attachment.
    #[must_use]
    pub fn attach(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.push((key.into(), value.into()));
        self
    }

    /// Copy attachments into a map for ambient context use.
    #[must_use]
    pub fn attachment_map(&self) -> Attachments {
        self.attachments.iter().cloned().collect()
    }

    /// Look up a parameter by name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&[u8]> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
}

/// The reply to one call, consumed exactly once by the matching pending
/// call.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub struct ResultEnvelope {
    /// Correlation id of the call being answered.
    pub correlation_id: CorrelationId,

    /// Result payload; absent for bare acknowledgements and failures.
    pub payload: Option<Vec<u8>>,

    /// Flattened exception chain when the remote handler raised.
    pub exception: Option<String>,

    /// Wire status code (see [`StatusCode`]).
    pub status: u32,
}

impl ResultEnvelope {
    /// A successful reply carrying a payload.
    #[must_use]
    pub fn ok(correlation_id: CorrelationId, payload: Vec<u8>) -> Self {
        Self {
            correlation_id,
            payload: Some(payload),
            exception: None,
            status: StatusCode::Ok.as_u32(),
        }
    }

    /// An empty acknowledgement (fire-and-forget receipt).
    #[must_use]
    pub fn ack(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            payload: None,
            exception: None,
            status: StatusCode::Ok.as_u32(),
        }
    }

    /// A failure reply carrying the captured exception chain.
    #[must_use]
    pub fn failure(
        correlation_id: CorrelationId,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            correlation_id,
            payload: None,
            exception: Some(message.into()),
            status: status.as_u32(),
        }
    }

    /// Whether the remote handler raised.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.exception.is_some()
    }

    /// Decoded status code.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u32(self.status)
    }
}

/// The payload union a `WireCodec` encodes and decodes.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[rkyv(derive(Debug))]
pub enum WireMessage {
    /// An inbound or outbound call.
    Call(CallEnvelope),
    /// A reply to a call.
    Result(ResultEnvelope),
}

impl WireMessage {
    /// Check if this is a call message.
    #[must_use]
    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call(_))
    }

    /// Check if this is a result message.
    #[must_use]
    pub fn is_result(&self) -> bool {
        matches!(self, Self::Result(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_envelope_builder() {
        let id = CorrelationId::generate();
        let env = CallEnvelope::new(id.clone(), "billing")
            .with_key("invoices")
            .param("amount", vec![1, 2, 3])
            .param("currency", b"EUR".to_vec())
            .attach("tenant", "acme");

        assert_eq!(env.correlation_id, id);
        assert_eq!(env.service_id, "billing");
        assert_eq!(env.service_key.as_deref(), Some("invoices"));
        assert_eq!(env.parameter("amount"), Some(&[1u8, 2, 3][..]));
        assert_eq!(env.parameter("currency"), Some(&b"EUR"[..]));
        assert_eq!(env.parameter("missing"), None);
        assert_eq!(env.attachment_map().get("tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn test_parameter_order_preserved() {
        let env = CallEnvelope::new(CorrelationId::generate(), "svc")
            .param("z", vec![])
            .param("a", vec![])
            .param("m", vec![]);

        let names: Vec<&str> = env.parameters.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["z", "a", "m"]);
    }

    #[test]
    fn test_result_constructors() {
        let id = CorrelationId::generate();

        let ok = ResultEnvelope::ok(id.clone(), vec![9]);
        assert!(!ok.is_failure());
        assert_eq!(ok.status_code(), StatusCode::Ok);

        let ack = ResultEnvelope::ack(id.clone());
        assert!(ack.payload.is_none());
        assert!(!ack.is_failure());

        let failure = ResultEnvelope::failure(id, "boom", StatusCode::Internal);
        assert!(failure.is_failure());
        assert_eq!(failure.status_code(), StatusCode::Internal);
        assert_eq!(failure.exception.as_deref(), Some("boom"));
    }

    #[test]
    fn test_status_code_roundtrip() {
        for code in [
            StatusCode::Ok,
            StatusCode::Cancelled,
            StatusCode::Unknown,
            StatusCode::InvalidArgument,
            StatusCode::DeadlineExceeded,
            StatusCode::NotFound,
            StatusCode::Internal,
            StatusCode::Unavailable,
        ] {
            assert_eq!(StatusCode::from_u32(code.as_u32()), code);
        }
        assert_eq!(StatusCode::from_u32(999), StatusCode::Unknown);
    }
}
