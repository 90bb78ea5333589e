//! Dispatch of decoded calls to local handlers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use stratus_core::{
    CallContext, CallEnvelope, ResultEnvelope, ServiceError, TransportError,
};

use crate::registry::ServiceRegistry;

/// Where replies for one inbound connection go.
///
/// Owned by whatever runs the connection's read loop; the dispatcher only
/// ever sends result envelopes through it.
pub trait ReplySink: Send + Sync + 'static {
    /// Send one result envelope back to the caller.
    fn send_reply(
        &self,
        envelope: ResultEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;
}

/// Flatten an error and its causal chain into one message.
///
/// Every `source()` in the chain contributes its message, pipe-joined in
/// causal order, so a caller observing only the envelope still sees the
/// full chain.
#[must_use]
pub fn exception_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(" | ")
}

/// Routes a decoded call to its local handler and produces the reply.
///
/// Entries that wait for execution reply with the handler's outcome;
/// fire-and-forget entries are acknowledged immediately and the handler
/// runs on a detached task whose failures are only logged. A call for an
/// unknown service is dropped with a diagnostic and no reply - the caller's
/// own deadline handles it.
pub struct Dispatcher {
    services: Arc<ServiceRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over a service registry.
    #[must_use]
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self { services }
    }

    /// The underlying registry.
    #[must_use]
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Dispatch one decoded call envelope.
    pub async fn dispatch(&self, call: CallEnvelope, reply: Arc<dyn ReplySink>) {
        let entry = match self.services.lookup(&call.service_id) {
            Some(entry) => entry,
            None => {
                tracing::warn!(
                    service = %call.service_id,
                    correlation_id = %call.correlation_id,
                    "dropping call for unknown service"
                );
                return;
            }
        };

        let correlation_id = call.correlation_id.clone();
        let ctx = CallContext {
            correlation_id: correlation_id.clone(),
            deadline: None,
            service_key: call.service_key.clone(),
            attachments: call.attachment_map(),
        };

        if entry.wait_for_execution() {
            let envelope = match entry.handler().invoke(ctx, call).await {
                Ok(payload) => ResultEnvelope::ok(correlation_id, payload),
                Err(error) => failure_envelope(correlation_id, &error),
            };

            if let Err(e) = reply.send_reply(envelope).await {
                tracing::debug!(error = %e, "failed to send reply");
            }
        } else {
            // Acknowledge receipt before the handler runs so the caller's
            // pending call resolves without waiting on execution
            if let Err(e) = reply.send_reply(ResultEnvelope::ack(correlation_id.clone())).await {
                tracing::debug!(error = %e, "failed to send ack");
            }

            let handler = entry.handler().clone();
            tokio::spawn(async move {
                if let Err(error) = handler.invoke(ctx, call).await {
                    tracing::error!(
                        correlation_id = %correlation_id,
                        error = %exception_chain(&error),
                        "detached handler failed"
                    );
                }
            });
        }
    }
}

fn failure_envelope(
    correlation_id: stratus_core::CorrelationId,
    error: &ServiceError,
) -> ResultEnvelope {
    ResultEnvelope::failure(correlation_id, exception_chain(error), error.status)
}
