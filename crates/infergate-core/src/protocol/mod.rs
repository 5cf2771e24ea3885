//! Protocol module containing the length-prefix framing codec.

pub mod codec;

pub use codec::{decode_length, encode, EncodingError, FrameCodec, FramingError, LengthWidth};
