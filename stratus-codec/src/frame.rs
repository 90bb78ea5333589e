//! Length-prefixed frame codec for wire messages.

use bytes::{Buf, BufMut, BytesMut};
use rkyv::util::AlignedVec;

use stratus_core::CodecError;

/// Default maximum frame size (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length-prefixed frame codec with alignment-preserving decode.
///
/// Frames are a 4-byte little-endian length prefix followed by the payload.
/// Decoded frames are returned as `AlignedVec` so the envelope codec can
/// validate them without re-copying.
///
/// ## Example
///
/// ```rust
/// use stratus_codec::FrameCodec;
/// use bytes::BytesMut;
///
/// let codec = FrameCodec::new();
/// let mut buf = BytesMut::new();
///
/// codec.encode(b"hello", &mut buf).unwrap();
///
/// let decoded = codec.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(decoded.as_slice(), b"hello");
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new codec with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom maximum frame size.
    #[inline]
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Get the maximum frame size.
    #[inline]
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Try to decode one frame from the buffer.
    ///
    /// Returns `Ok(None)` if the buffer does not yet hold a complete frame;
    /// consumed bytes are advanced past on success.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<AlignedVec>, CodecError> {
        // Need at least 4 bytes for the length prefix
        if src.len() < 4 {
            return Ok(None);
        }

        // Read length (little-endian u32)
        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;

        // Validate frame size
        if len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        // Check if we have the complete frame
        let total_len = 4 + len;
        if src.len() < total_len {
            // Reserve space for the rest of the frame
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        // Skip the length prefix
        src.advance(4);

        // Extract the payload
        let data = src.split_to(len);

        // Copy to an aligned buffer so the envelope codec can validate
        // in place; this is the only copy on the receive path
        let mut aligned = AlignedVec::with_capacity(len);
        aligned.extend_from_slice(&data);

        Ok(Some(aligned))
    }

    /// Encode a payload into the buffer.
    pub fn encode(&self, item: &[u8], dst: &mut BytesMut) -> Result<(), CodecError> {
        let len = item.len();

        if len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        dst.reserve(4 + len);
        dst.put_u32_le(len as u32);
        dst.put_slice(item);

        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}
