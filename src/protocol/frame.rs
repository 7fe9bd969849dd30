//! Frame struct with byte accessors.
//!
//! A frame is one complete bus packet as recovered by the
//! [`FrameDecoder`](super::FrameDecoder). It carries no parsed fields: the
//! offsets of header, command and room bytes depend on the bus family and are
//! interpreted by the family's classifier.
//!
//! # Example
//!
//! ```
//! use wallpad_bridge::protocol::Frame;
//!
//! let frame = Frame::from_slice(&[0x02, 0x31, 0x0D, 0x01]);
//! assert_eq!(frame.len(), 4);
//! assert_eq!(frame.byte(1), 0x31);
//! assert_eq!(frame.to_hex(), "02310d01");
//! ```

use bytes::Bytes;

/// A complete bus frame (zero-copy via `bytes::Bytes`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    /// Create a frame from owned bytes.
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    /// Create a frame from a slice (copies data).
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(bytes),
        }
    }

    /// Raw frame bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Clone of the bytes as `Bytes` (cheap, zero-copy).
    #[inline]
    pub fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// Total frame length.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the frame is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte at `index`, or `0` when out of range.
    ///
    /// Decoders read fixed offsets of frames whose length was already matched
    /// against the registry, so a missing byte only happens for malformed input.
    #[inline]
    pub fn byte(&self, index: usize) -> u8 {
        self.bytes.get(index).copied().unwrap_or(0)
    }

    /// Byte at `index` if present.
    #[inline]
    pub fn get(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    /// Lowercase hex rendering used in logs.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(Bytes::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::from(vec![0xAA, 0x55, 0x30]);
        assert_eq!(frame.len(), 3);
        assert!(!frame.is_empty());
        assert_eq!(frame.get(2), Some(0x30));
        assert_eq!(frame.get(3), None);
        assert_eq!(frame.byte(3), 0);
    }

    #[test]
    fn test_to_bytes_zero_copy() {
        let frame = Frame::new(Bytes::from_static(&[1, 2, 3]));
        let bytes = frame.to_bytes();
        assert_eq!(bytes.as_ptr(), frame.as_bytes().as_ptr());
    }
}
