//! Per-call context and correlation identifiers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rkyv::{Archive, Deserialize, Serialize};

/// Process-wide counter folded into generated correlation ids.
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique token linking an outbound call to its eventual reply.
///
/// Ids are caller-generated: 16 bytes derived from a timestamp and a
/// process-wide counter, rendered as 32 lowercase hex characters. Two ids
/// generated by the same process never collide; ids from distinct processes
/// are disambiguated by the timestamp half.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[rkyv(derive(Debug, PartialEq, Eq, Hash))]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh unique id.
    #[must_use]
    pub fn generate() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let nanos = now.as_nanos() as u64;
        let seq = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&nanos.to_le_bytes());
        bytes[8..].copy_from_slice(&seq.to_le_bytes());

        let mut id = String::with_capacity(32);
        for byte in bytes {
            use std::fmt::Write;
            let _ = write!(id, "{byte:02x}");
        }
        Self(id)
    }

    /// Wrap an externally supplied id verbatim.
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// String key-value attachments carried alongside a call.
pub type Attachments = HashMap<String, String>;

/// Ambient state for one call.
///
/// Client-side the context carries the generated correlation id, the call
/// deadline, and outbound attachments. Server-side it is reconstructed from
/// the incoming envelope and handed to the handler for the duration of that
/// single dispatch.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Correlation id for this call.
    pub correlation_id: CorrelationId,

    /// Absolute deadline. `None` means no deadline is enforced.
    pub deadline: Option<Instant>,

    /// Opaque sub-target key, forwarded verbatim from the envelope.
    pub service_key: Option<String>,

    /// Key-value attachments.
    pub attachments: Attachments,
}

impl CallContext {
    /// Create a new context with a fresh correlation id and no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            correlation_id: CorrelationId::generate(),
            deadline: None,
            service_key: None,
            attachments: HashMap::new(),
        }
    }

    /// Create a context with a timeout from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            ..Self::new()
        }
    }

    /// Create a context with an absolute deadline.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::new()
        }
    }

    /// Set a timeout from now.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Add an attachment.
    #[must_use]
    pub fn attach(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    /// Set the opaque service key.
    #[must_use]
    pub fn with_service_key(mut self, key: impl Into<String>) -> Self {
        self.service_key = Some(key.into());
        self
    }

    /// Get an attachment value.
    #[must_use]
    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }

    /// Get remaining time until the deadline.
    /// Returns `None` if no deadline is set or it has already passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .and_then(|d| d.checked_duration_since(Instant::now()))
    }

    /// Check if the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}
