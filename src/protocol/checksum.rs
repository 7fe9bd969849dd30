//! Checksum policies.
//!
//! Two policies exist on the supported buses:
//!
//! - **Rolling XOR+increment**: accumulator seeded with `0x03`; for every byte
//!   `acc = (acc ^ b) + 1` truncated to 8 bits. Covers every byte except the
//!   trailing checksum slot.
//! - **Sum-mod-256**: sum of a fixed-size prefix plus one, modulo 256, stored
//!   at a fixed offset.
//!
//! A frame passes verification exactly when the checksum recomputed over the
//! covered region equals the transmitted checksum byte. In particular a
//! computed value of `0x00` is a pass when it matches the transmitted byte.
//!
//! # Example
//!
//! ```
//! use wallpad_bridge::protocol::ChecksumPolicy;
//!
//! let mut frame = [0x02, 0x31, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
//! ChecksumPolicy::RollingXor.apply(&mut frame);
//! assert_eq!(frame[9], 0x3D);
//! assert!(ChecksumPolicy::RollingXor.verify(&frame));
//! ```

/// Seed of the rolling XOR accumulator.
pub const ROLLING_XOR_SEED: u8 = 0x03;

/// Rolling XOR+increment over `bytes`.
pub fn rolling_xor(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(ROLLING_XOR_SEED, |acc, b| (acc ^ b).wrapping_add(1))
}

/// Sum of `bytes` plus one, modulo 256.
pub fn sum_mod_256(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(1u8, |acc, b| acc.wrapping_add(*b))
}

/// Checksum policy of a bus family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumPolicy {
    /// Rolling XOR+increment over `frame[..n-1]`, stored at `frame[n-1]`.
    RollingXor,
    /// Sum-mod-256 over `frame[..covered]`, stored at `frame[covered]`.
    SumMod256 { covered: usize },
}

impl ChecksumPolicy {
    /// Offset of the checksum byte in a frame of length `len`.
    pub fn position(&self, len: usize) -> Option<usize> {
        match self {
            ChecksumPolicy::RollingXor => len.checked_sub(1),
            ChecksumPolicy::SumMod256 { covered } if *covered < len => Some(*covered),
            ChecksumPolicy::SumMod256 { .. } => None,
        }
    }

    /// Checksum of the covered region of `frame`.
    ///
    /// Returns `None` if the frame is too short to carry a checksum.
    pub fn compute(&self, frame: &[u8]) -> Option<u8> {
        let position = self.position(frame.len())?;
        Some(match self {
            ChecksumPolicy::RollingXor => rolling_xor(&frame[..position]),
            ChecksumPolicy::SumMod256 { .. } => sum_mod_256(&frame[..position]),
        })
    }

    /// Whether the recomputed checksum equals the transmitted checksum byte.
    pub fn verify(&self, frame: &[u8]) -> bool {
        match (self.compute(frame), self.position(frame.len())) {
            (Some(expected), Some(position)) => frame[position] == expected,
            _ => false,
        }
    }

    /// Write the checksum into its slot. Returns `false` if the frame is too short.
    pub fn apply(&self, frame: &mut [u8]) -> bool {
        match (self.compute(frame), self.position(frame.len())) {
            (Some(sum), Some(position)) => {
                frame[position] = sum;
                true
            }
            _ => false,
        }
    }
}
