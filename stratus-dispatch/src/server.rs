//! TCP accept/read loop feeding the dispatcher.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use stratus_codec::FrameCodec;
use stratus_core::{ResultEnvelope, TransportError, WireCodec, WireMessage};

use crate::dispatch::{Dispatcher, ReplySink};

/// Configuration for the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: String,

    /// Maximum frame size.
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            max_frame_size: stratus_codec::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    #[must_use]
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Set the maximum frame size.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}

/// TCP server accepting inbound call connections.
///
/// Each accepted connection gets its own read task; each decoded call is
/// dispatched on its own task so one slow handler never holds up the
/// connection, and replies are matched by correlation id rather than
/// ordering.
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    wire: Arc<dyn WireCodec>,
}

impl Server {
    /// Create a server over a dispatcher.
    #[must_use]
    pub fn new(config: ServerConfig, dispatcher: Arc<Dispatcher>, wire: Arc<dyn WireCodec>) -> Self {
        Self {
            config,
            dispatcher,
            wire,
        }
    }

    /// Bind the listener and spawn the accept loop.
    pub async fn bind(self) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        let (stop, mut stopped) = watch::channel(false);
        let dispatcher = self.dispatcher;
        let wire = self.wire;
        let max_frame_size = self.config.max_frame_size;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "connection established");
                            tokio::spawn(handle_connection(
                                stream,
                                dispatcher.clone(),
                                wire.clone(),
                                max_frame_size,
                            ));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    },
                    _ = stopped.changed() => {
                        tracing::debug!("server stopped");
                        break;
                    }
                }
            }
        });

        Ok(ServerHandle {
            local_addr,
            stop,
            task,
        })
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    local_addr: std::net::SocketAddr,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections.
    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
    }

    /// Wait for the accept loop to exit.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Reply sink serializing writes through one connection's write half.
struct ConnectionReplySink {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    codec: FrameCodec,
    wire: Arc<dyn WireCodec>,
}

impl ReplySink for ConnectionReplySink {
    fn send_reply(
        &self,
        envelope: ResultEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        Box::pin(async move {
            let payload = self
                .wire
                .encode(&WireMessage::Result(envelope))
                .map_err(|e| TransportError::Protocol(e.to_string()))?;

            let mut buf = BytesMut::with_capacity(4 + payload.len());
            self.codec
                .encode(&payload, &mut buf)
                .map_err(|e| TransportError::Protocol(e.to_string()))?;

            let mut writer = self.writer.lock().await;
            writer.write_all(&buf).await?;
            writer.flush().await?;
            Ok(())
        })
    }
}

/// Per-connection read loop: frame-decode, envelope-decode, dispatch.
///
/// Envelope decode failures drop the message (the sender's deadline covers
/// it); frame corruption closes the connection.
async fn handle_connection(
    stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    wire: Arc<dyn WireCodec>,
    max_frame_size: usize,
) {
    let _ = stream.set_nodelay(true);
    let (mut read_half, write_half) = stream.into_split();

    let codec = FrameCodec::with_max_frame_size(max_frame_size);
    let sink: Arc<dyn ReplySink> = Arc::new(ConnectionReplySink {
        writer: tokio::sync::Mutex::new(write_half),
        codec: codec.clone(),
        wire: wire.clone(),
    });

    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        // Drain every complete frame before reading more
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => match wire.decode(&frame) {
                    Ok(WireMessage::Call(envelope)) => {
                        // One task per call so a slow waiting handler does
                        // not block later calls on this connection
                        let dispatcher = dispatcher.clone();
                        let sink = sink.clone();
                        tokio::spawn(async move {
                            dispatcher.dispatch(envelope, sink).await;
                        });
                    }
                    Ok(WireMessage::Result(envelope)) => {
                        tracing::warn!(
                            correlation_id = %envelope.correlation_id,
                            "dropping unexpected result on server connection"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable message");
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "frame decode failed, closing connection");
                    return;
                }
            }
        }

        match read_half.read_buf(&mut buf).await {
            Ok(0) => {
                tracing::debug!("connection closed by peer");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{handler_fn, ServiceEntry, ServiceRegistry};
    use std::time::Duration;
    use stratus_codec::EnvelopeCodec;
    use stratus_core::{CallEnvelope, CorrelationId};

    async fn echo_server() -> ServerHandle {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register(ServiceEntry::new(
            "echo",
            "/echo",
            handler_fn(|_ctx, call: CallEnvelope| async move {
                Ok(call.parameter("payload").unwrap_or_default().to_vec())
            }),
        ));

        Server::new(
            ServerConfig::new().bind_addr("127.0.0.1:0"),
            Arc::new(Dispatcher::new(registry)),
            Arc::new(EnvelopeCodec::new()),
        )
        .bind()
        .await
        .unwrap()
    }

    /// Raw client: one framed call envelope out, one framed result back.
    async fn raw_call(
        addr: std::net::SocketAddr,
        envelope: CallEnvelope,
    ) -> Option<ResultEnvelope> {
        let wire = EnvelopeCodec::new();
        let codec = FrameCodec::new();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let payload = wire.encode(&WireMessage::Call(envelope)).unwrap();
        let mut out = BytesMut::new();
        codec.encode(&payload, &mut out).unwrap();
        stream.write_all(&out).await.unwrap();

        let mut buf = BytesMut::new();
        loop {
            if let Some(frame) = codec.decode(&mut buf).unwrap() {
                match wire.decode(&frame).unwrap() {
                    WireMessage::Result(result) => return Some(result),
                    WireMessage::Call(_) => continue,
                }
            }
            let read = tokio::time::timeout(Duration::from_secs(1), stream.read_buf(&mut buf))
                .await
                .ok()?
                .unwrap();
            if read == 0 {
                return None;
            }
        }
    }

    #[tokio::test]
    async fn test_server_answers_echo_call() {
        let server = echo_server().await;

        let id = CorrelationId::generate();
        let call = CallEnvelope::new(id.clone(), "echo").param("payload", b"hi".to_vec());

        let reply = raw_call(server.local_addr(), call).await.unwrap();
        assert_eq!(reply.correlation_id, id);
        assert_eq!(reply.payload, Some(b"hi".to_vec()));

        server.shutdown();
        server.join().await;
    }

    #[tokio::test]
    async fn test_server_answers_builtin_ping() {
        let server = echo_server().await;

        let call = CallEnvelope::new(CorrelationId::generate(), stratus_core::PING_SERVICE_ID);
        let reply = raw_call(server.local_addr(), call).await.unwrap();
        assert!(!reply.is_failure());
        assert_eq!(reply.payload, Some(Vec::new()));

        server.shutdown();
        server.join().await;
    }

    #[tokio::test]
    async fn test_unknown_service_gets_no_reply() {
        let server = echo_server().await;

        let call = CallEnvelope::new(CorrelationId::generate(), "missing");
        assert!(raw_call(server.local_addr(), call).await.is_none());

        server.shutdown();
        server.join().await;
    }
}
