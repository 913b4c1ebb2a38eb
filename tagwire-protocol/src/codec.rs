//! Framing codecs.
//!
//! Two framings are supported; a connection uses exactly one of them.
//!
//! Delimited (envelopes):
//!
//! ```text
//! +----------------------+---------------------------+
//! | length (LEB128 u32)  | JSON envelope             |
//! | 1-5 bytes            | length bytes              |
//! +----------------------+---------------------------+
//! ```
//!
//! Length-prefixed (raw payloads, no tag):
//!
//! ```text
//! +----------------------+---------------------------+
//! | length (u16 BE)      | payload                   |
//! | 2 bytes              | length bytes              |
//! +----------------------+---------------------------+
//! ```

use crate::envelope::{Envelope, PayloadSet};
use crate::error::ProtocolError;
use crate::{MAX_FRAME_SIZE, MAX_SHORT_FRAME_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::marker::PhantomData;

/// Longest valid varint encoding of a u32.
const MAX_VARINT_LEN: usize = 5;

/// Size of the length-prefixed frame header.
const SHORT_HEADER_SIZE: usize = 2;

/// Converts items to and from self-delimited frames.
pub trait Codec {
    type Item;

    /// Appends one encoded frame to `dst`.
    fn encode(&self, item: &Self::Item, dst: &mut BytesMut) -> Result<(), ProtocolError>;

    /// Decodes one frame from the front of `src`.
    ///
    /// Returns `Ok(Some(item))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed (nothing is consumed), or `Err` on
    /// corrupt input.
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Self::Item>, ProtocolError>;

    /// Encodes a single frame into a fresh buffer.
    fn encode_frame(&self, item: &Self::Item) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(item, &mut buf)?;
        Ok(buf)
    }
}

/// Varint-delimited JSON framing for [`Envelope`]s.
pub struct DelimitedCodec<P> {
    max_frame_size: u32,
    _payloads: PhantomData<fn() -> P>,
}

impl<P> DelimitedCodec<P> {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Creates a codec that rejects frame bodies above `max` bytes.
    pub fn with_max_frame_size(max: u32) -> Self {
        Self {
            max_frame_size: max,
            _payloads: PhantomData,
        }
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }
}

impl<P> Default for DelimitedCodec<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Clone for DelimitedCodec<P> {
    fn clone(&self) -> Self {
        Self::with_max_frame_size(self.max_frame_size)
    }
}

impl<P> fmt::Debug for DelimitedCodec<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelimitedCodec")
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

impl<P: PayloadSet> Codec for DelimitedCodec<P> {
    type Item = Envelope<P>;

    fn encode(&self, item: &Envelope<P>, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let body = serde_json::to_vec(item)?;
        if body.len() as u64 > self.max_frame_size as u64 {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len() as u64,
                max: self.max_frame_size as u64,
            });
        }

        dst.reserve(MAX_VARINT_LEN + body.len());
        put_varint(body.len() as u32, dst);
        dst.put_slice(&body);
        Ok(())
    }

    fn decode(&self, src: &mut BytesMut) -> Result<Option<Envelope<P>>, ProtocolError> {
        let Some((body_len, prefix_len)) = peek_varint(src)? else {
            return Ok(None);
        };

        if body_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: body_len as u64,
                max: self.max_frame_size as u64,
            });
        }

        // Buffer growth is left to the reader, so a bare header cannot
        // force a large allocation.
        let total_len = prefix_len + body_len as usize;
        if src.len() < total_len {
            return Ok(None);
        }

        src.advance(prefix_len);
        let body = src.split_to(body_len as usize);
        let envelope = serde_json::from_slice(&body)?;
        Ok(Some(envelope))
    }
}

/// 2-byte big-endian length-prefixed framing for raw payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthPrefixedCodec;

impl LengthPrefixedCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for LengthPrefixedCodec {
    type Item = Bytes;

    fn encode(&self, item: &Bytes, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if item.len() > MAX_SHORT_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: item.len() as u64,
                max: MAX_SHORT_FRAME_SIZE as u64,
            });
        }

        dst.reserve(SHORT_HEADER_SIZE + item.len());
        dst.put_u16(item.len() as u16);
        dst.put_slice(item);
        Ok(())
    }

    fn decode(&self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        if src.len() < SHORT_HEADER_SIZE {
            return Ok(None);
        }

        let payload_len = u16::from_be_bytes([src[0], src[1]]) as usize;
        let total_len = SHORT_HEADER_SIZE + payload_len;
        if src.len() < total_len {
            return Ok(None);
        }

        src.advance(SHORT_HEADER_SIZE);
        Ok(Some(src.split_to(payload_len).freeze()))
    }
}

/// Writes `value` as an unsigned LEB128 varint.
fn put_varint(mut value: u32, dst: &mut BytesMut) {
    while value >= 0x80 {
        dst.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Reads a varint from the front of `src` without consuming it.
///
/// Returns the value and its encoded length, or `None` if the varint is not
/// complete yet.
fn peek_varint(src: &[u8]) -> Result<Option<(u32, usize)>, ProtocolError> {
    let mut value: u64 = 0;
    for (i, &byte) in src.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return u32::try_from(value)
                .map(|v| Some((v, i + 1)))
                .map_err(|_| ProtocolError::MalformedLength);
        }
    }

    if src.len() >= MAX_VARINT_LEN {
        Err(ProtocolError::MalformedLength)
    } else {
        Ok(None)
    }
}
