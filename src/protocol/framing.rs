//! Framing policies understood by the [`FrameDecoder`](super::FrameDecoder).
//!
//! ```text
//! Length-prefixed:  [prefix][header][length][cmd...][room][payload...][checksum]
//! Fixed-marker:     [AA 55][...........fixed body...........][checksum][0D 0D]
//! ```

/// Frames shorter than this cannot hold prefix, header, length and checksum.
pub const MIN_PREFIXED_FRAME_LEN: usize = 4;

/// A header whose frames have a fixed length regardless of the length byte.
///
/// Some short status frames reuse the length position for a command code,
/// so the length cannot be read from the frame itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortFrameRule {
    /// Header bytes the rule applies to.
    pub headers: &'static [u8],
    /// Values of the byte after the header that select the rule. `None` matches any.
    pub codes: Option<&'static [u8]>,
    /// Total frame length.
    pub len: usize,
}

impl ShortFrameRule {
    fn matches(&self, header: u8, code: u8) -> bool {
        self.headers.contains(&header) && self.codes.map_or(true, |codes| codes.contains(&code))
    }
}

/// Boundary = prefix byte immediately followed by a header byte; the next byte
/// is the total frame length (inclusive of prefix and header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthPrefixed {
    pub prefixes: &'static [u8],
    pub headers: &'static [u8],
    pub short_frames: &'static [ShortFrameRule],
    pub max_len: usize,
}

impl LengthPrefixed {
    #[inline]
    pub fn is_prefix(&self, byte: u8) -> bool {
        self.prefixes.contains(&byte)
    }

    #[inline]
    pub fn is_header(&self, byte: u8) -> bool {
        self.headers.contains(&byte)
    }

    /// Total length of a frame starting with `header` whose third byte is `code`.
    pub fn expected_len(&self, header: u8, code: u8) -> usize {
        self.short_frames
            .iter()
            .find(|rule| rule.matches(header, code))
            .map_or(code as usize, |rule| rule.len)
    }

    /// Whether a declared length can be collected.
    #[inline]
    pub fn accepts_len(&self, len: usize) -> bool {
        (MIN_PREFIXED_FRAME_LEN..=self.max_len).contains(&len)
    }
}

/// Fixed total length with explicit two-byte start and end markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedMarker {
    pub start: [u8; 2],
    pub end: [u8; 2],
    pub len: usize,
}

impl FixedMarker {
    /// Write the end marker into the last two bytes of an outbound frame.
    pub fn seal(&self, frame: &mut [u8]) {
        if frame.len() >= 2 {
            let at = frame.len() - 2;
            frame[at..].copy_from_slice(&self.end);
        }
    }
}

/// How a byte stream is cut into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingPolicy {
    LengthPrefixed(LengthPrefixed),
    FixedMarker(FixedMarker),
}

impl FramingPolicy {
    /// Upper bound on the bytes a single frame may span.
    pub fn max_len(&self) -> usize {
        match self {
            FramingPolicy::LengthPrefixed(p) => p.max_len,
            FramingPolicy::FixedMarker(m) => m.len,
        }
    }

    /// Finish an outbound frame (end markers). Length-prefixed frames need nothing.
    pub fn seal(&self, frame: &mut [u8]) {
        if let FramingPolicy::FixedMarker(m) = self {
            m.seal(frame);
        }
    }
}
