//! Protocol module - framing, checksums, and frame types.
//!
//! This module implements the byte level of the bus:
//! - Framing policies (length-prefixed and fixed-marker)
//! - Frame decoder for recovering frames from a raw byte stream
//! - Checksum policies
//! - Frame struct with byte accessors

mod checksum;
mod decoder;
mod frame;
mod framing;

pub use checksum::{rolling_xor, sum_mod_256, ChecksumPolicy, ROLLING_XOR_SEED};
pub use decoder::{DecoderStats, FrameDecoder};
pub use frame::Frame;
pub use framing::{FixedMarker, FramingPolicy, LengthPrefixed, ShortFrameRule, MIN_PREFIXED_FRAME_LEN};
