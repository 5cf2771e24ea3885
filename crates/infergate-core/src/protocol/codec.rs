//! Length-prefix codec for infergate frames.
//!
//! Wire format (identical in both directions):
//! ```text
//! [length:N][payload:length]
//! ```
//! `N` is 2, 4 or 8 and fixed for the lifetime of a server instance.  The
//! length is an unsigned big-endian integer counting payload bytes only.
//!
//! The codec is stateless.  A [`FrameCodec`] is `Copy` and can be shared by
//! every session without synchronisation.

use thiserror::Error;

/// Errors raised while interpreting a length prefix.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The configured prefix width is not one of 2, 4 or 8.
    #[error("unsupported length field width: {0} bytes (expected 2, 4 or 8)")]
    UnsupportedWidth(usize),

    /// The byte slice handed to the decoder is not exactly one prefix wide.
    #[error("length prefix must be exactly {expected} bytes, got {actual}")]
    WrongPrefixLength { expected: usize, actual: usize },
}

/// Errors raised while building a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    /// The configured prefix width is not one of 2, 4 or 8.
    #[error("unsupported length field width: {0} bytes (expected 2, 4 or 8)")]
    UnsupportedWidth(usize),

    /// The payload is longer than the prefix can express.
    #[error("payload of {len} bytes does not fit a {width}-byte length field (max {max})")]
    PayloadTooLong { len: usize, width: usize, max: u64 },
}

/// Byte width of the length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LengthWidth {
    /// 2-byte prefix, payloads up to 65 535 bytes.
    U16,
    /// 4-byte prefix.
    U32,
    /// 8-byte prefix.
    U64,
}

impl LengthWidth {
    /// Number of bytes the prefix occupies on the wire.
    pub const fn bytes(self) -> usize {
        match self {
            LengthWidth::U16 => 2,
            LengthWidth::U32 => 4,
            LengthWidth::U64 => 8,
        }
    }

    /// Largest payload length representable in this width.
    pub const fn max_length(self) -> u64 {
        match self {
            LengthWidth::U16 => u16::MAX as u64,
            LengthWidth::U32 => u32::MAX as u64,
            LengthWidth::U64 => u64::MAX,
        }
    }
}

impl TryFrom<usize> for LengthWidth {
    type Error = FramingError;

    fn try_from(bytes: usize) -> Result<Self, Self::Error> {
        match bytes {
            2 => Ok(LengthWidth::U16),
            4 => Ok(LengthWidth::U32),
            8 => Ok(LengthWidth::U64),
            other => Err(FramingError::UnsupportedWidth(other)),
        }
    }
}

impl std::fmt::Display for LengthWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bytes())
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// A codec bound to one validated prefix width.
///
/// # Examples
///
/// ```rust
/// use infergate_core::FrameCodec;
///
/// let codec = FrameCodec::new(4).unwrap();
/// let frame = codec.encode(b"hello").unwrap();
/// assert_eq!(&frame[..4], &[0, 0, 0, 5]);
/// assert_eq!(codec.decode_length(&frame[..4]).unwrap(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    width: LengthWidth,
}

impl FrameCodec {
    /// Creates a codec for a prefix of `width_bytes` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::UnsupportedWidth`] unless `width_bytes` is 2, 4 or 8.
    pub fn new(width_bytes: usize) -> Result<Self, FramingError> {
        LengthWidth::try_from(width_bytes).map(Self::with_width)
    }

    /// Creates a codec from an already validated width.
    pub const fn with_width(width: LengthWidth) -> Self {
        Self { width }
    }

    /// The prefix width this codec reads and writes.
    pub const fn width(&self) -> LengthWidth {
        self.width
    }

    /// Prefix size in bytes.
    pub const fn prefix_len(&self) -> usize {
        self.width.bytes()
    }

    /// Encodes `len` as a big-endian prefix of the configured width.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::PayloadTooLong`] if `len` does not fit.
    pub fn encode_length(&self, len: usize) -> Result<Vec<u8>, EncodingError> {
        let len64 = len as u64;
        let max = self.width.max_length();
        if len64 > max {
            return Err(EncodingError::PayloadTooLong {
                len,
                width: self.width.bytes(),
                max,
            });
        }
        let prefix = match self.width {
            LengthWidth::U16 => (len64 as u16).to_be_bytes().to_vec(),
            LengthWidth::U32 => (len64 as u32).to_be_bytes().to_vec(),
            LengthWidth::U64 => len64.to_be_bytes().to_vec(),
        };
        Ok(prefix)
    }

    /// Builds a complete frame: prefix followed by `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::PayloadTooLong`] if the payload length exceeds
    /// what the prefix width can represent (65 535 for a 2-byte prefix).
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, EncodingError> {
        let prefix = self.encode_length(payload.len())?;
        let mut frame = Vec::with_capacity(prefix.len() + payload.len());
        frame.extend_from_slice(&prefix);
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    /// Decodes a length prefix.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::WrongPrefixLength`] unless `bytes` is exactly
    /// one prefix wide.
    pub fn decode_length(&self, bytes: &[u8]) -> Result<u64, FramingError> {
        let expected = self.width.bytes();
        if bytes.len() != expected {
            return Err(FramingError::WrongPrefixLength {
                expected,
                actual: bytes.len(),
            });
        }
        let value = match self.width {
            LengthWidth::U16 => u64::from(u16::from_be_bytes([bytes[0], bytes[1]])),
            LengthWidth::U32 => {
                u64::from(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            LengthWidth::U64 => u64::from_be_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]),
        };
        Ok(value)
    }
}

/// Encodes `payload` with a prefix of `width_bytes` bytes.
///
/// Convenience wrapper for callers holding a raw width (for example straight
/// from configuration).
///
/// # Errors
///
/// Returns [`EncodingError::UnsupportedWidth`] for a width other than 2, 4 or
/// 8, or [`EncodingError::PayloadTooLong`] if the payload does not fit.
pub fn encode(payload: &[u8], width_bytes: usize) -> Result<Vec<u8>, EncodingError> {
    let codec =
        FrameCodec::new(width_bytes).map_err(|_| EncodingError::UnsupportedWidth(width_bytes))?;
    codec.encode(payload)
}

/// Decodes a prefix of `width_bytes` bytes.
///
/// # Errors
///
/// Returns [`FramingError::UnsupportedWidth`] for a width other than 2, 4 or
/// 8, or [`FramingError::WrongPrefixLength`] if `bytes` is not exactly
/// `width_bytes` long.
pub fn decode_length(bytes: &[u8], width_bytes: usize) -> Result<u64, FramingError> {
    FrameCodec::new(width_bytes)?.decode_length(bytes)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
