//! Connection and dispatch error types.

use tagwire_protocol::{ProtocolError, Tag};
use thiserror::Error;

/// Error type returned by handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ConnectionError {
    /// Returns whether the peer closed the stream in the middle of a frame.
    pub fn is_truncation(&self) -> bool {
        matches!(self, ConnectionError::Protocol(e) if e.is_truncation())
    }
}

/// A per-slot dispatch failure.
///
/// These never abort dispatch of the remaining slots of an envelope.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no handler for '{payload}' (tag {tag})")]
    NoHandler { tag: Tag, payload: &'static str },

    #[error("handler for '{payload}' failed (tag {tag}): {source}")]
    HandlerFailed {
        tag: Tag,
        payload: &'static str,
        #[source]
        source: HandlerError,
    },
}

impl DispatchError {
    /// Returns the type name of the payload that could not be handled.
    pub fn payload(&self) -> &'static str {
        match self {
            DispatchError::NoHandler { payload, .. } => payload,
            DispatchError::HandlerFailed { payload, .. } => payload,
        }
    }

    /// Returns the tag of the envelope being dispatched.
    pub fn tag(&self) -> Tag {
        match self {
            DispatchError::NoHandler { tag, .. } => *tag,
            DispatchError::HandlerFailed { tag, .. } => *tag,
        }
    }
}
