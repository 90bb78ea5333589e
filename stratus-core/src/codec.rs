//! Wire codec trait seam.

use crate::envelope::WireMessage;
use crate::error::CodecError;

/// Byte-level encoding of wire messages.
///
/// The runtime treats both envelope kinds as opaque payloads once encoded;
/// everything byte-shaped lives behind this trait so a deployment can swap
/// the default codec for its own format.
pub trait WireCodec: Send + Sync + 'static {
    /// Encode a message into bytes.
    fn encode(&self, message: &WireMessage) -> Result<Vec<u8>, CodecError>;

    /// Decode a message from bytes.
    fn decode(&self, bytes: &[u8]) -> Result<WireMessage, CodecError>;
}
