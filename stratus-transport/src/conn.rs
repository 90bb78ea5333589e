//! The shared connection handle to one endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use stratus_codec::FrameCodec;
use stratus_core::{Endpoint, TransportError, WireCodec, WireMessage};

use crate::mux::Multiplexer;

/// Configuration for outbound connections.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Connection handshake timeout.
    pub connect_timeout: Duration,

    /// Enable TCP nodelay.
    pub nodelay: bool,

    /// Maximum frame size.
    pub max_frame_size: usize,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            nodelay: true,
            max_frame_size: stratus_codec::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ConnectConfig {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum frame size.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}

/// The single shared logical connection to one endpoint.
///
/// Shared read-only by every caller targeting that endpoint; writes are
/// serialized through an async mutex on the write half, and a spawned read
/// loop resolves inbound result envelopes into the shared [`Multiplexer`].
/// The handle is torn down (and evicted from the cache) on send failure.
pub struct Connection {
    endpoint: Endpoint,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    codec: FrameCodec,
    open: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Connect to an endpoint and spawn its inbound read loop.
    pub async fn connect(
        endpoint: Endpoint,
        config: &ConnectConfig,
        wire: Arc<dyn WireCodec>,
        mux: Arc<Multiplexer>,
    ) -> Result<Arc<Self>, TransportError> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(endpoint.addr()))
            .await
            .map_err(|_| {
                TransportError::ConnectionFailed(format!(
                    "connect to {endpoint} timed out after {:?}",
                    config.connect_timeout
                ))
            })?
            .map_err(|e| TransportError::ConnectionFailed(format!("{endpoint}: {e}")))?;

        if config.nodelay {
            stream.set_nodelay(true)?;
        }

        let codec = FrameCodec::with_max_frame_size(config.max_frame_size);
        let (read_half, write_half) = stream.into_split();

        let open = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(
            endpoint.clone(),
            read_half,
            codec.clone(),
            wire,
            mux,
            open.clone(),
        ));

        tracing::debug!(%endpoint, "connection established");

        Ok(Arc::new(Self {
            endpoint,
            writer: tokio::sync::Mutex::new(write_half),
            codec,
            open,
            reader,
        }))
    }

    /// The endpoint this connection is bound to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Check if the connection is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    /// Send an encoded payload as one frame.
    pub async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut buf = BytesMut::with_capacity(4 + payload.len());
        self.codec
            .encode(payload, &mut buf)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        writer.flush().await?;

        Ok(())
    }

    /// Close the connection and stop its read loop.
    pub fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
        self.reader.abort();
        tracing::debug!(endpoint = %self.endpoint, "connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Relaxed);
        self.reader.abort();
    }
}

/// Inbound half: decode frames and resolve result envelopes into the
/// correlation table. Runs until the peer closes or the frame stream turns
/// invalid.
async fn read_loop(
    endpoint: Endpoint,
    mut read_half: OwnedReadHalf,
    codec: FrameCodec,
    wire: Arc<dyn WireCodec>,
    mux: Arc<Multiplexer>,
    open: Arc<AtomicBool>,
) {
    let mut buf = BytesMut::with_capacity(8 * 1024);

    'io: loop {
        // Drain every complete frame before reading more
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => match wire.decode(&frame) {
                    Ok(WireMessage::Result(envelope)) => {
                        mux.resolve(envelope);
                    }
                    Ok(WireMessage::Call(envelope)) => {
                        tracing::warn!(
                            %endpoint,
                            service = %envelope.service_id,
                            "dropping unexpected call on client connection"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(%endpoint, error = %e, "dropping undecodable message");
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(%endpoint, error = %e, "frame decode failed, closing connection");
                    break 'io;
                }
            }
        }

        match read_half.read_buf(&mut buf).await {
            Ok(0) => {
                tracing::debug!(%endpoint, "connection closed by peer");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(%endpoint, error = %e, "read failed");
                break;
            }
        }
    }

    open.store(false, Ordering::Relaxed);
}
