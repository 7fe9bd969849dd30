//! Byte-stream framer.
//!
//! Uses `bytes::BytesMut` for the working buffer. Bytes are consumed one at a
//! time so the recovered frames depend only on the byte sequence, never on how
//! reads happened to chunk it.
//!
//! Length-prefixed state machine:
//! - `Idle`: between frames; a prefix byte followed by a header byte starts a
//!   frame and flushes anything accumulated before it
//! - `AwaitingLength`: prefix and header seen, next byte declares the length
//! - `Collecting`: counting bytes up to the declared length; a boundary seen
//!   here flushes the partial frame and starts the next one
//! - `Resync`: after a framing error; bytes are dropped until the next boundary
//!
//! Fixed-marker framing scans for the start marker and checks the end marker
//! at its fixed offset, dropping the start marker when it is absent.
//!
//! # Example
//!
//! ```
//! use wallpad_bridge::family::ProtocolKind;
//! use wallpad_bridge::protocol::FrameDecoder;
//!
//! let mut decoder = FrameDecoder::new(ProtocolKind::Bestin.family().framing);
//!
//! // the status frame arrives split over two reads
//! assert!(decoder.push(&[0x02, 0x31, 0x02, 0x00]).is_empty());
//! decoder.extend(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x3D]);
//!
//! let frame = decoder.next_frame().unwrap();
//! assert_eq!(frame.len(), 10);
//! assert!(decoder.next_frame().is_none());
//! ```

use std::collections::VecDeque;

use bytes::{Buf, BufMut, BytesMut};

use super::framing::{FixedMarker, FramingPolicy, LengthPrefixed};
use super::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    AwaitingLength,
    Collecting { expected: usize },
    Resync,
}

/// Counters for malformed input, exposed for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames handed out (including junk flushed at a boundary).
    pub frames: u64,
    /// Declared lengths out of range, overflows and missing end markers.
    pub framing_errors: u64,
    /// Bytes dropped while resynchronizing.
    pub discarded_bytes: u64,
}

/// Accumulates raw bus bytes and extracts frames according to a [`FramingPolicy`].
pub struct FrameDecoder {
    policy: FramingPolicy,
    buffer: BytesMut,
    state: State,
    ready: VecDeque<Frame>,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new(policy: FramingPolicy) -> Self {
        Self {
            buffer: BytesMut::with_capacity(policy.max_len() * 2),
            policy,
            state: State::Idle,
            ready: VecDeque::new(),
            stats: DecoderStats::default(),
        }
    }

    /// Feed raw bytes. Completed frames become available via [`next_frame`](Self::next_frame).
    pub fn extend(&mut self, data: &[u8]) {
        for &byte in data {
            self.buffer.put_u8(byte);
            match self.policy {
                FramingPolicy::LengthPrefixed(policy) => self.step_prefixed(&policy, byte),
                FramingPolicy::FixedMarker(policy) => self.step_marker(&policy),
            }
        }
    }

    /// Next completed frame, if any.
    pub fn next_frame(&mut self) -> Option<Frame> {
        self.ready.pop_front()
    }

    /// Feed bytes and drain every frame completed so far.
    pub fn push(&mut self, data: &[u8]) -> Vec<Frame> {
        self.extend(data);
        self.ready.drain(..).collect()
    }

    /// Drain completed frames lazily.
    pub fn frames(&mut self) -> impl Iterator<Item = Frame> + '_ {
        std::iter::from_fn(move || self.next_frame())
    }

    /// Drop buffered bytes and pending frames, e.g. after the transport reconnects.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.ready.clear();
        self.state = State::Idle;
    }

    /// Number of bytes buffered towards an incomplete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    pub fn policy(&self) -> &FramingPolicy {
        &self.policy
    }

    fn emit(&mut self, len: usize) {
        let bytes = self.buffer.split_to(len).freeze();
        self.stats.frames += 1;
        self.ready.push_back(Frame::new(bytes));
    }

    fn discard(&mut self, len: usize) {
        self.buffer.advance(len);
        self.stats.discarded_bytes += len as u64;
    }

    fn step_prefixed(&mut self, policy: &LengthPrefixed, byte: u8) {
        let len = self.buffer.len();
        match self.state {
            State::Idle | State::Resync => {
                if len >= 2 && policy.is_prefix(self.buffer[len - 2]) && policy.is_header(byte) {
                    let before = len - 2;
                    if before > 0 {
                        if self.state == State::Idle {
                            // junk is still handed out; the checksum check rejects it
                            self.emit(before);
                        } else {
                            self.discard(before);
                        }
                    }
                    self.state = State::AwaitingLength;
                } else if len > policy.max_len {
                    // keep the last byte, it may be the next prefix
                    self.stats.framing_errors += 1;
                    self.discard(len - 1);
                    self.state = State::Resync;
                }
            }
            State::AwaitingLength => {
                let expected = policy.expected_len(self.buffer[1], byte);
                if policy.accepts_len(expected) {
                    self.state = State::Collecting { expected };
                } else {
                    tracing::debug!(
                        header = self.buffer[1],
                        declared = expected,
                        "frame length out of range, resynchronizing"
                    );
                    self.stats.framing_errors += 1;
                    self.discard(len - 1);
                    self.state = State::Resync;
                }
            }
            State::Collecting { expected } => {
                if policy.is_prefix(self.buffer[len - 2]) && policy.is_header(byte) {
                    // a new boundary cuts the frame short; the checksum check rejects it
                    self.emit(len - 2);
                    self.state = State::AwaitingLength;
                } else if len == expected {
                    self.emit(expected);
                    self.state = State::Idle;
                }
            }
        }
    }

    fn step_marker(&mut self, policy: &FixedMarker) {
        while self.buffer.len() >= policy.len {
            match find_marker(&self.buffer, policy.start) {
                Some(0) => {}
                Some(at) => {
                    self.discard(at);
                    continue;
                }
                None => {
                    let keep = usize::from(self.buffer.last() == Some(&policy.start[0]));
                    let stale = self.buffer.len() - keep;
                    self.discard(stale);
                    return;
                }
            }

            let end = policy.len - 2;
            if self.buffer[end..policy.len] != policy.end {
                self.stats.framing_errors += 1;
                self.discard(2);
                continue;
            }

            self.emit(policy.len);
        }
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::ProtocolKind;

    fn bestin() -> FrameDecoder {
        FrameDecoder::new(ProtocolKind::Bestin.family().framing)
    }

    fn kocom() -> FrameDecoder {
        FrameDecoder::new(ProtocolKind::Kocom.family().framing)
    }

    const GAS: [u8; 10] = [0x02, 0x31, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x3D];
    const DOORLOCK: [u8; 10] = [0x02, 0x41, 0x80, 0x00, 0x00, 0x51, 0x00, 0x00, 0x00, 0x00];
    const CUTOFF: [u8; 11] = [0x02, 0x31, 0x0B, 0x02, 0x31, 0x3F, 0x00, 0x00, 0x00, 0x00, 0x51];

    fn thermostat_ack() -> Vec<u8> {
        let mut frame = vec![0u8; 16];
        frame[..4].copy_from_slice(&[0x02, 0x28, 0x10, 0x91]);
        frame[5] = 0x01;
        frame
    }

    fn kocom_frame(tag: u8) -> Vec<u8> {
        let mut frame = vec![0u8; 21];
        frame[0] = 0xAA;
        frame[1] = 0x55;
        for (i, b) in frame[2..19].iter_mut().enumerate() {
            *b = tag.wrapping_add(i as u8);
        }
        frame[19] = 0x0D;
        frame[20] = 0x0D;
        frame
    }

    fn stream() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&GAS);
        bytes.extend_from_slice(&thermostat_ack());
        bytes.extend_from_slice(&DOORLOCK);
        bytes.extend_from_slice(&GAS);
        bytes
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = bestin();
        let frames = decoder.push(&GAS);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &GAS);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut decoder = bestin();
        let frames = decoder.push(&stream());
        let lens: Vec<_> = frames.iter().map(Frame::len).collect();
        assert_eq!(lens, vec![10, 16, 10, 10]);
        assert_eq!(decoder.stats().frames, 4);
    }

    #[test]
    fn test_chunk_invariance_prefixed() {
        let bytes = stream();
        let whole = bestin().push(&bytes);

        for chunk in 1..=bytes.len() {
            let mut decoder = bestin();
            let mut frames = Vec::new();
            for part in bytes.chunks(chunk) {
                frames.extend(decoder.push(part));
            }
            assert_eq!(frames, whole, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_chunk_invariance_fixed_marker() {
        let mut bytes = vec![0x13, 0xAA];
        bytes.extend_from_slice(&kocom_frame(1));
        bytes.extend_from_slice(&[0xAA, 0x55, 0x00]);
        bytes.extend_from_slice(&kocom_frame(7));
        let whole = kocom().push(&bytes);
        assert_eq!(whole.len(), 2);

        for chunk in 1..=bytes.len() {
            let mut decoder = kocom();
            let frames: Vec<_> = bytes
                .chunks(chunk)
                .flat_map(|part| decoder.push(part))
                .collect();
            assert_eq!(frames, whole, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_frames_iterator_is_lazy() {
        let mut decoder = bestin();
        decoder.extend(&stream());
        let first: Vec<_> = decoder.frames().take(1).collect();
        assert_eq!(first.len(), 1);
        assert_eq!(decoder.frames().count(), 3);
        assert_eq!(decoder.frames().count(), 0);
    }

    #[test]
    fn test_junk_before_boundary_is_flushed() {
        let mut decoder = bestin();
        // a lone stray byte after a complete frame
        let mut bytes = GAS.to_vec();
        bytes.push(0x55);
        bytes.extend_from_slice(&GAS);
        let frames = decoder.push(&bytes);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].as_bytes(), &[0x55]);
        assert_eq!(frames[2].as_bytes(), &GAS);
    }

    #[test]
    fn test_oversized_length_resyncs() {
        let mut decoder = bestin();
        let mut bytes = vec![0x02, 0x28, 0xF0, 0x11, 0x22];
        bytes.extend_from_slice(&GAS);
        let frames = decoder.push(&bytes);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &GAS);
        assert_eq!(decoder.stats().framing_errors, 1);
        // prefix and header dropped on error, then 0xF0, 0x11, 0x22 at the boundary
        assert_eq!(decoder.stats().discarded_bytes, 5);
    }

    #[test]
    fn test_zero_length_does_not_wedge() {
        let mut decoder = bestin();
        let mut bytes = vec![0x02, 0x28, 0x00];
        bytes.extend_from_slice(&GAS);
        let frames = decoder.push(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &GAS);
    }

    #[test]
    fn test_noise_overflow_resyncs() {
        let mut decoder = bestin();
        decoder.extend(&[0x11; 100]);
        assert!(decoder.next_frame().is_none());
        assert!(decoder.buffered() <= 65);
        assert!(decoder.stats().framing_errors >= 1);

        let frames = decoder.push(&GAS);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &GAS);
    }

    #[test]
    fn test_back_to_back_fixed_frames() {
        let mut bytes = kocom_frame(3);
        bytes.extend_from_slice(&kocom_frame(9));

        let mut decoder = kocom();
        let frames = decoder.push(&bytes);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 21));
        assert_eq!(frames[0].as_bytes(), &kocom_frame(3)[..]);
        assert_eq!(frames[1].as_bytes(), &kocom_frame(9)[..]);
    }

    #[test]
    fn test_missing_end_marker_resyncs() {
        let mut broken = kocom_frame(2);
        broken[19] = 0x00;
        let mut bytes = broken;
        bytes.extend_from_slice(&kocom_frame(5));

        let mut decoder = kocom();
        let frames = decoder.push(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &kocom_frame(5)[..]);
        assert_eq!(decoder.stats().framing_errors, 1);
    }

    #[test]
    fn test_reset_clears_partial_frame() {
        let mut decoder = bestin();
        decoder.extend(&GAS[..6]);
        assert_eq!(decoder.buffered(), 6);
        decoder.reset();
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.push(&GAS).len(), 1);
    }

    #[test]
    fn test_truncated_frame_does_not_swallow_next() {
        let mut decoder = bestin();
        // first 8 bytes of a frame declaring 16
        let mut bytes = thermostat_ack()[..8].to_vec();
        bytes.extend_from_slice(&GAS);
        bytes.extend_from_slice(&GAS);

        let frames = decoder.push(&bytes);
        let lens: Vec<_> = frames.iter().map(Frame::len).collect();
        assert_eq!(lens, vec![8, 10, 10]);
        assert_eq!(frames[1].as_bytes(), &GAS);
        assert_eq!(frames[2].as_bytes(), &GAS);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_truncated_frame_chunk_invariance() {
        let mut bytes = thermostat_ack()[..8].to_vec();
        bytes.extend_from_slice(&GAS);
        bytes.extend_from_slice(&DOORLOCK);
        let whole = bestin().push(&bytes);

        for chunk in 1..=bytes.len() {
            let mut decoder = bestin();
            let frames: Vec<_> = bytes
                .chunks(chunk)
                .flat_map(|part| decoder.push(part))
                .collect();
            assert_eq!(frames, whole, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_boundary_inside_body_splits_frame() {
        // the batch cut-off command carries `02 31` in its body
        let frames = bestin().push(&CUTOFF);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &CUTOFF[..3]);
    }
}
