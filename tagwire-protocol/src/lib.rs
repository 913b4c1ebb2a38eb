//! # tagwire-protocol
//!
//! Wire protocol implementation for tagwire.
//!
//! This crate provides:
//! - Tagged envelopes carrying a set of optional typed payload slots
//! - Correlation tag allocation
//! - Varint-delimited JSON framing for envelopes
//! - 2-byte length-prefixed framing for raw payloads
//!
//! Payload sets are declared by the host with [`payload_set!`], which needs
//! `serde` (with the `derive` feature) in the host crate's dependencies and
//! this crate under its own name, `tagwire_protocol`.

// Lets `payload_set!` expansions name this crate the same way inside and
// outside of it.
extern crate self as tagwire_protocol;

pub mod codec;
pub mod envelope;
pub mod error;
pub mod tag;

pub use codec::{Codec, DelimitedCodec, LengthPrefixedCodec};
pub use envelope::{Envelope, Payload, PayloadSet};
pub use error::ProtocolError;
pub use tag::TagAllocator;

/// Correlation tag type carried by every envelope.
pub type Tag = i32;

/// Maximum delimited frame body size (16 MiB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Maximum payload size for length-prefixed frames.
pub const MAX_SHORT_FRAME_SIZE: usize = u16::MAX as usize;
