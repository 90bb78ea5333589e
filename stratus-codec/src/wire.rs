//! Default rkyv-based envelope codec.

use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;

use stratus_core::{CodecError, WireCodec, WireMessage};

/// The default `WireCodec`: rkyv-serialized envelopes.
///
/// Encoding produces a self-contained byte buffer; decoding validates the
/// archived form before deserializing into owned envelopes. Deployments
/// with their own wire format plug in behind the `WireCodec` trait instead.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Create a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl WireCodec for EnvelopeCodec {
    fn encode(&self, message: &WireMessage) -> Result<Vec<u8>, CodecError> {
        rkyv::to_bytes::<RkyvError>(message)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| CodecError::Serialization(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<WireMessage, CodecError> {
        // Validation requires an aligned buffer; inbound frames from
        // FrameCodec are already aligned, arbitrary slices are re-aligned
        // here before access
        if bytes.as_ptr().align_offset(16) == 0 {
            rkyv::from_bytes::<WireMessage, RkyvError>(bytes)
                .map_err(|e| CodecError::Deserialization(e.to_string()))
        } else {
            let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
            aligned.extend_from_slice(bytes);
            rkyv::from_bytes::<WireMessage, RkyvError>(&aligned)
                .map_err(|e| CodecError::Deserialization(e.to_string()))
        }
    }
}
