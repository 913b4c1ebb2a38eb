//! Async frame reading and writing over byte streams.

use bytes::BytesMut;
use tagwire_protocol::{Codec, ProtocolError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Reads whole frames from an `AsyncRead`.
#[derive(Debug)]
pub struct FrameReader<R, C> {
    inner: R,
    codec: C,
    buffer: BytesMut,
    read_buffer_size: usize,
}

impl<R, C> FrameReader<R, C>
where
    R: AsyncRead + Unpin,
    C: Codec,
{
    pub fn new(inner: R, codec: C) -> Self {
        Self::with_read_buffer_size(inner, codec, DEFAULT_READ_BUFFER_SIZE)
    }

    /// Creates a reader that grows its buffer by `size` bytes per socket read.
    pub fn with_read_buffer_size(inner: R, codec: C, size: usize) -> Self {
        let size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        Self {
            inner,
            codec,
            buffer: BytesMut::with_capacity(size),
            read_buffer_size: size,
        }
    }

    /// Reads the next frame.
    ///
    /// Blocks until a whole frame is buffered. Returns `Ok(None)` when the
    /// stream ends on a frame boundary and [`ProtocolError::Truncated`] when
    /// it ends inside one.
    pub async fn next(&mut self) -> Result<Option<C::Item>, ProtocolError> {
        loop {
            if let Some(item) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(item));
            }

            self.buffer.reserve(self.read_buffer_size);
            let n = self.inner.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::Truncated {
                    buffered: self.buffer.len(),
                });
            }
            tracing::trace!("Read {} bytes ({} buffered)", n, self.buffer.len());
        }
    }

    /// Returns the number of bytes read but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes whole frames to an `AsyncWrite`.
#[derive(Debug)]
pub struct FrameWriter<W, C> {
    inner: W,
    codec: C,
    buffer: BytesMut,
}

impl<W, C> FrameWriter<W, C>
where
    W: AsyncWrite + Unpin,
    C: Codec,
{
    pub fn new(inner: W, codec: C) -> Self {
        Self {
            inner,
            codec,
            buffer: BytesMut::new(),
        }
    }

    /// Encodes `item` and writes it out as a single frame, then flushes.
    ///
    /// Nothing is written if encoding fails.
    pub async fn send(&mut self, item: &C::Item) -> Result<usize, ProtocolError> {
        self.buffer.clear();
        self.codec.encode(item, &mut self.buffer)?;
        self.inner.write_all(&self.buffer).await?;
        self.inner.flush().await?;
        Ok(self.buffer.len())
    }

    /// Shuts down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tagwire_protocol::LengthPrefixedCodec;

    #[tokio::test]
    async fn test_reads_declared_length() {
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(b"\x00\x05hello").await.unwrap();
        drop(server);

        let mut reader = FrameReader::new(client, LengthPrefixedCodec::new());
        let payload = reader.next().await.unwrap().unwrap();
        assert_eq!(payload.len(), 5);
        assert_eq!(&payload[..], b"hello");
        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(b"\x00\x05hel").await.unwrap();
        drop(server);

        let mut reader = FrameReader::new(client, LengthPrefixedCodec::new());
        let result = reader.next().await;
        assert!(matches!(
            result,
            Err(ProtocolError::Truncated { buffered: 5 })
        ));
    }

    #[tokio::test]
    async fn test_truncated_header_is_an_error() {
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(b"\x00").await.unwrap();
        drop(server);

        let mut reader = FrameReader::new(client, LengthPrefixedCodec::new());
        assert!(reader.next().await.unwrap_err().is_truncation());
    }

    #[tokio::test]
    async fn test_clean_close_is_end_of_stream() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);

        let mut reader = FrameReader::new(client, LengthPrefixedCodec::new());
        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_accumulates_partial_reads() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(client, LengthPrefixedCodec::new());

        let writer = tokio::spawn(async move {
            for piece in [&b"\x00"[..], b"\x05h", b"el", b"lo"] {
                server.write_all(piece).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let payload = reader.next().await.unwrap().unwrap();
        assert_eq!(&payload[..], b"hello");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_large_frame_through_small_pipe() {
        let (client, server) = tokio::io::duplex(16);
        let payload = Bytes::from(vec![7u8; 4000]);

        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            let mut writer = FrameWriter::new(server, LengthPrefixedCodec::new());
            writer.send(&payload).await.unwrap()
        });

        let mut reader = FrameReader::new(client, LengthPrefixedCodec::new());
        assert_eq!(reader.next().await.unwrap().unwrap(), expected);
        assert_eq!(writer.await.unwrap(), 4002);
    }

    #[tokio::test]
    async fn test_writer_rejects_oversized_frame() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(server, LengthPrefixedCodec::new());

        let result = writer.send(&Bytes::from(vec![0u8; 70_000])).await;
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));

        writer.shutdown().await.unwrap();
        let mut reader = FrameReader::new(client, LengthPrefixedCodec::new());
        assert!(reader.next().await.unwrap().is_none());
    }

    #[test]
    fn test_read_buffer_size_is_clamped() {
        let (client, _server) = tokio::io::duplex(64);
        let reader = FrameReader::with_read_buffer_size(client, LengthPrefixedCodec::new(), 1);
        assert_eq!(reader.read_buffer_size, MIN_READ_BUFFER_SIZE);
        assert_eq!(reader.buffered(), 0);
    }
}
