//! Connection management.

use crate::config::ConnectionConfig;
use crate::dispatch::dispatch;
use crate::error::ConnectionError;
use crate::handler::HandlerSet;
use crate::stream::{FrameReader, FrameWriter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tagwire_protocol::{Codec, DelimitedCodec, Envelope, PayloadSet, Tag, TagAllocator};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Connection statistics.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub envelopes_read: AtomicU64,
    /// Replies written by the read loop.
    pub replies_sent: AtomicU64,
    /// Envelopes written through [`Connection::write`] or
    /// [`Connection::send`], whether requests or caller-built replies.
    pub envelopes_sent: AtomicU64,
    pub dispatch_failures: AtomicU64,
    pub write_failures: AtomicU64,
}

/// A framed, dispatching connection over a reader/writer pair.
///
/// One task drives [`run`](Self::run); any number of tasks may call
/// [`write`](Self::write) or [`send`](Self::send) concurrently through a
/// shared `Arc<Connection>`. Writes are serialized so frames never
/// interleave.
pub struct Connection<R, W, P, C = DelimitedCodec<P>> {
    /// Unique connection ID, used in logs.
    id: String,
    /// Read half (only the read loop touches it).
    reader: Mutex<FrameReader<R, C>>,
    /// Write half, shared by replies and outbound requests.
    writer: Mutex<FrameWriter<W, C>>,
    /// Handlers for inbound payloads.
    handlers: Arc<HandlerSet<P>>,
    /// Tags for outbound requests.
    tags: TagAllocator,
    stats: ConnectionStats,
}

impl<R, W, P> Connection<R, W, P>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    P: PayloadSet,
{
    /// Creates a connection using the default delimited framing and no
    /// handlers.
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_codec(reader, writer, DelimitedCodec::new())
    }

    /// Creates a connection with framing limits taken from `config`.
    pub fn from_config(reader: R, writer: W, config: &ConnectionConfig) -> Self {
        let codec = DelimitedCodec::with_max_frame_size(config.max_frame_size);
        Self::build(
            FrameReader::with_read_buffer_size(reader, codec.clone(), config.read_buffer_size),
            FrameWriter::new(writer, codec),
        )
    }
}

impl<R, W, P, C> Connection<R, W, P, C>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    P: PayloadSet,
    C: Codec<Item = Envelope<P>> + Clone + Send,
{
    /// Creates a connection using `codec` for both directions.
    pub fn with_codec(reader: R, writer: W, codec: C) -> Self {
        Self::build(
            FrameReader::new(reader, codec.clone()),
            FrameWriter::new(writer, codec),
        )
    }

    fn build(reader: FrameReader<R, C>, writer: FrameWriter<W, C>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            handlers: Arc::new(HandlerSet::new()),
            tags: TagAllocator::new(),
            stats: ConnectionStats::default(),
        }
    }

    /// Sets the handlers used by the read loop.
    pub fn with_handlers(self, handlers: HandlerSet<P>) -> Self {
        self.with_shared_handlers(Arc::new(handlers))
    }

    /// Sets handlers shared with other connections.
    pub fn with_shared_handlers(mut self, handlers: Arc<HandlerSet<P>>) -> Self {
        self.handlers = handlers;
        self
    }

    /// Overrides the tag allocator, e.g. to resume a tag sequence.
    pub fn with_tags(mut self, tags: TagAllocator) -> Self {
        self.tags = tags;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handlers(&self) -> &HandlerSet<P> {
        &self.handlers
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Creates an empty request envelope with a fresh tag.
    pub fn request(&self) -> Envelope<P> {
        self.tags.request()
    }

    /// Reads the next envelope.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream cleanly.
    pub async fn read(&self) -> Result<Option<Envelope<P>>, ConnectionError> {
        let envelope = self.reader.lock().await.next().await?;
        if let Some(ref envelope) = envelope {
            self.stats.envelopes_read.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(conn = %self.id, tag = envelope.tag(), "Envelope received");
        }
        Ok(envelope)
    }

    /// Runs the read loop until the peer closes the stream.
    ///
    /// Every envelope is dispatched and its reply, if any, is written
    /// before the next envelope is read. Failing to write a reply is logged
    /// and does not stop the loop; a corrupt or truncated frame does.
    pub async fn run(&self) -> Result<(), ConnectionError> {
        tracing::debug!(conn = %self.id, "Read loop started");

        loop {
            let envelope = match self.read().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    tracing::debug!(conn = %self.id, "Connection closed by peer");
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(conn = %self.id, error = %e, "Read loop stopped");
                    return Err(e);
                }
            };

            let outcome = dispatch(&envelope, &self.handlers);
            if !outcome.failures.is_empty() {
                self.stats
                    .dispatch_failures
                    .fetch_add(outcome.failures.len() as u64, Ordering::Relaxed);
            }

            let Some(reply) = outcome.reply else {
                continue;
            };

            match self.write_frame(&reply).await {
                Ok(()) => {
                    self.stats.replies_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        conn = %self.id,
                        tag = reply.tag(),
                        error = %e,
                        "Unable to send reply"
                    );
                }
            }
        }
    }

    /// Writes a caller-built envelope.
    pub async fn write(&self, envelope: &Envelope<P>) -> Result<(), ConnectionError> {
        match self.write_frame(envelope).await {
            Ok(()) => {
                self.stats.envelopes_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Sends `payloads` as a new request and returns its tag.
    pub async fn send(&self, payloads: P) -> Result<Tag, ConnectionError> {
        let request = self.request().with_payloads(payloads);
        self.write(&request).await?;
        Ok(request.tag())
    }

    /// Shuts down the write half. The read loop keeps running until the
    /// peer closes its side.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        tracing::debug!(conn = %self.id, "Closing connection");
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }

    async fn write_frame(&self, envelope: &Envelope<P>) -> Result<(), ConnectionError> {
        let mut writer = self.writer.lock().await;
        let n = writer.send(envelope).await?;
        tracing::debug!(conn = %self.id, tag = envelope.tag(), "Wrote {} bytes", n);
        Ok(())
    }
}
