//! Messages understood by the demo peer.

use serde::{Deserialize, Serialize};

/// Asks the peer to list a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListing {
    pub path: String,
}

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error,
}

/// Liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub seq: u64,
}

/// Answer to a [`Ping`], echoing its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub seq: u64,
}

tagwire_protocol::payload_set! {
    /// Payload slots of every envelope exchanged by the demo peer.
    pub struct Messages {
        listing: FileListing,
        status: Status,
        ping: Ping,
        pong: Pong,
    }
}

impl Messages {
    pub fn ping(seq: u64) -> Self {
        Self {
            ping: Some(Ping { seq }),
            ..Default::default()
        }
    }
}
