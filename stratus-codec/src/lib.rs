//! # stratus-codec
//!
//! Framing and the default envelope codec for the Stratus RPC runtime.
//!
//! This crate provides:
//! - `FrameCodec` - Length-prefixed frame encoder/decoder
//! - `EnvelopeCodec` - rkyv-based `WireCodec` implementation
//!
//! ## Frame Format
//!
//! ```text
//! +----------------+------------------+
//! | Length (4 LE)  | Payload (N bytes)|
//! +----------------+------------------+
//! ```
//!
//! The length is a 32-bit little-endian integer specifying the payload size.

mod frame;
mod wire;

pub use frame::{FrameCodec, DEFAULT_MAX_FRAME_SIZE};
pub use wire::EnvelopeCodec;

// Re-export for convenience
pub use rkyv::util::AlignedVec;
