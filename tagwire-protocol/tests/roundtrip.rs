//! Property tests for envelope framing.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use tagwire_protocol::{
    payload_set, Codec, DelimitedCodec, Envelope, LengthPrefixedCodec, PayloadSet, ProtocolError,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FileEntry {
    name: String,
    size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Listing {
    path: String,
    entries: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Heartbeat;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Status {
    Ok,
    Error(String),
}

payload_set! {
    struct Messages {
        listing: Listing,
        status: Status,
        heartbeat: Heartbeat,
        seq: u64,
    }
}

fn arb_listing() -> impl Strategy<Value = Listing> {
    (
        ".*",
        prop::collection::vec((".*", any::<u64>()), 0..4),
    )
        .prop_map(|(path, entries)| Listing {
            path,
            entries: entries
                .into_iter()
                .map(|(name, size)| FileEntry { name, size })
                .collect(),
        })
}

fn arb_status() -> impl Strategy<Value = Status> {
    prop_oneof![Just(Status::Ok), ".*".prop_map(Status::Error)]
}

fn arb_envelope() -> impl Strategy<Value = Envelope<Messages>> {
    (
        any::<i32>(),
        prop::option::of(arb_listing()),
        prop::option::of(arb_status()),
        prop::option::of(Just(Heartbeat)),
        prop::option::of(any::<u64>()),
    )
        .prop_map(|(tag, listing, status, heartbeat, seq)| {
            Envelope::new(
                tag,
                Messages {
                    listing,
                    status,
                    heartbeat,
                    seq,
                },
            )
        })
}

proptest! {
    #[test]
    fn delimited_decode_inverts_encode(envelope in arb_envelope()) {
        let codec = DelimitedCodec::<Messages>::new();
        let mut buf = codec.encode_frame(&envelope).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();

        prop_assert_eq!(decoded.tag(), envelope.tag());
        prop_assert_eq!(
            decoded.payloads().populated().len(),
            envelope.payloads().populated().len()
        );
        prop_assert_eq!(&decoded, &envelope);
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn delimited_stream_survives_arbitrary_chunking(
        envelopes in prop::collection::vec(arb_envelope(), 1..6),
        chunk in 1usize..32,
    ) {
        let codec = DelimitedCodec::<Messages>::new();
        let mut wire = BytesMut::new();
        for envelope in &envelopes {
            codec.encode(envelope, &mut wire).unwrap();
        }

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(envelope) = codec.decode(&mut buf).unwrap() {
                decoded.push(envelope);
            }
        }

        prop_assert_eq!(decoded, envelopes);
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn length_prefixed_never_returns_short_payload(
        payload in prop::collection::vec(any::<u8>(), 0..512),
        cut in 0usize..514,
    ) {
        let codec = LengthPrefixedCodec::new();
        let wire = codec.encode_frame(&Bytes::from(payload.clone())).unwrap();
        let cut = cut.min(wire.len());

        let mut buf = BytesMut::from(&wire[..cut]);
        match codec.decode(&mut buf).unwrap() {
            Some(decoded) => {
                prop_assert_eq!(cut, wire.len());
                prop_assert_eq!(&decoded[..], &payload[..]);
            }
            None => prop_assert!(cut < wire.len()),
        }
    }
}

#[test]
fn corrupt_length_is_fatal() {
    let codec = DelimitedCodec::<Messages>::new();
    let mut buf = BytesMut::from(&[0xFFu8, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF][..]);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::MalformedLength)
    ));
}
