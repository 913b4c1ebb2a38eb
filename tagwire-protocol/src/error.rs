//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while framing or parsing envelopes.
///
/// Every variant is fatal to the decode call that produced it; a stream that
/// yields one of these cannot be resynchronised.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("malformed length prefix")]
    MalformedLength,

    #[error("stream closed mid-frame with {buffered} bytes buffered")]
    Truncated { buffered: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the peer hung up in the middle of a frame.
    pub fn is_truncation(&self) -> bool {
        matches!(self, ProtocolError::Truncated { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("50"));

        let err = ProtocolError::Truncated { buffered: 3 };
        assert!(err.to_string().contains('3'));
        assert!(err.is_truncation());

        let err = ProtocolError::MalformedLength;
        assert!(err.to_string().contains("length"));
        assert!(!err.is_truncation());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: ProtocolError = io.into();
        assert!(matches!(err, ProtocolError::Io(_)));
    }
}
