//! TCP peer.

use crate::schema::Messages;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tagwire_connection::{Config, Connection, ConnectionConfig, HandlerSet, HeartbeatConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Peer statistics.
#[derive(Debug, Default)]
pub struct PeerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub errors_total: AtomicU64,
}

/// Accepts connections and runs a read loop on each one.
pub struct Peer {
    config: Config,
    handlers: Arc<HandlerSet<Messages>>,
    stats: Arc<PeerStats>,
    shutdown: broadcast::Sender<()>,
}

impl Peer {
    pub fn new(config: Config, handlers: HandlerSet<Messages>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handlers: Arc::new(handlers),
            stats: Arc::new(PeerStats::default()),
            shutdown: shutdown_tx,
        }
    }

    pub fn stats(&self) -> &PeerStats {
        &self.stats
    }

    /// Stops accepting connections.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Binds the configured address and serves until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.network.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves connections accepted from `listener`.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        tracing::info!("Peer listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.network.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let (reader, writer) = tcp_stream.into_split();
                            let handlers = self.handlers.clone();
                            let stats = self.stats.clone();
                            let connection = self.config.connection.clone();
                            let heartbeat = self.config.heartbeat.clone();

                            tokio::spawn(async move {
                                handle_connection(
                                    reader,
                                    writer,
                                    addr,
                                    handlers,
                                    &connection,
                                    &heartbeat,
                                    &stats,
                                )
                                .await;
                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("Peer disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Peer shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Runs the read loop for one connection, plus its heartbeat if enabled.
pub async fn handle_connection<R, W>(
    reader: R,
    writer: W,
    addr: SocketAddr,
    handlers: Arc<HandlerSet<Messages>>,
    connection: &ConnectionConfig,
    heartbeat: &HeartbeatConfig,
    stats: &PeerStats,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let conn = Arc::new(
        Connection::from_config(reader, writer, connection).with_shared_handlers(handlers),
    );
    tracing::info!(conn = conn.id(), "Peer connected: {}", addr);

    let heartbeat_task = heartbeat.enabled.then(|| {
        let conn = conn.clone();
        let interval = heartbeat.interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            let mut seq = 0u64;
            loop {
                ticker.tick().await;
                seq += 1;
                match conn.send(Messages::ping(seq)).await {
                    Ok(tag) => tracing::debug!(conn = conn.id(), tag, seq, "Heartbeat sent"),
                    Err(e) => {
                        tracing::warn!(conn = conn.id(), error = %e, "Heartbeat failed");
                        break;
                    }
                }
            }
        })
    });

    if let Err(e) = conn.run().await {
        tracing::debug!(conn = conn.id(), "Connection {} error: {}", addr, e);
        stats.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    if let Some(task) = heartbeat_task {
        task.abort();
    }

    let conn_stats = conn.stats();
    tracing::debug!(
        conn = conn.id(),
        envelopes = conn_stats.envelopes_read.load(Ordering::Relaxed),
        replies = conn_stats.replies_sent.load(Ordering::Relaxed),
        dispatch_failures = conn_stats.dispatch_failures.load(Ordering::Relaxed),
        "Connection finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers;
    use crate::schema::{Pong, Status};
    use std::time::Duration;
    use tagwire_connection::FrameReader;
    use tagwire_protocol::{Codec, DelimitedCodec, Envelope};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    fn test_config(max_connections: usize) -> Config {
        let mut config = Config::default();
        config.network.max_connections = max_connections;
        config
    }

    async fn start(config: Config) -> (Arc<Peer>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = Arc::new(Peer::new(config, handlers::build()));
        let serving = peer.clone();
        tokio::spawn(async move { serving.serve(listener).await });
        (peer, addr)
    }

    #[tokio::test]
    async fn test_serves_ping_over_tcp() {
        let (peer, addr) = start(test_config(4)).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let codec = DelimitedCodec::<Messages>::new();

        let frame = codec.encode_frame(&Envelope::new(11, Messages::ping(5))).unwrap();
        write.write_all(&frame).await.unwrap();

        let mut reader = FrameReader::new(read, codec);
        let reply = reader.next().await.unwrap().unwrap();
        assert_eq!(reply.tag(), 11);
        assert_eq!(reply.payloads().pong, Some(Pong { seq: 5 }));
        assert!(reply.payloads().status.is_none());

        assert_eq!(peer.stats().connections_total.load(Ordering::Relaxed), 1);
        peer.shutdown();
    }

    #[tokio::test]
    async fn test_rejects_over_connection_limit() {
        let (peer, addr) = start(test_config(1)).await;

        let first = TcpStream::connect(addr).await.unwrap();
        // Wait until the first connection is registered
        while peer.stats().connections_active.load(Ordering::Relaxed) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = TcpStream::connect(addr).await.unwrap();
        let (read, _write) = second.into_split();
        let mut reader = FrameReader::new(read, DelimitedCodec::<Messages>::new());
        // Rejected streams are dropped without a frame
        assert!(reader.next().await.unwrap().is_none());
        assert_eq!(peer.stats().connections_rejected.load(Ordering::Relaxed), 1);

        drop(first);
        peer.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_sends_pings() {
        let (local, remote) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(local);
        let heartbeat = HeartbeatConfig {
            enabled: true,
            interval_secs: 1,
        };
        let connection = ConnectionConfig::default();
        let stats = PeerStats::default();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let (remote_read, mut remote_write) = tokio::io::split(remote);
        let mut reader = FrameReader::new(remote_read, DelimitedCodec::<Messages>::new());

        let session = handle_connection(
            read,
            write,
            addr,
            Arc::new(handlers::build()),
            &connection,
            &heartbeat,
            &stats,
        );

        let check = async {
            let first = reader.next().await.unwrap().unwrap();
            let second = reader.next().await.unwrap().unwrap();
            assert_eq!(first.payloads().ping.map(|p| p.seq), Some(1));
            assert_eq!(second.payloads().ping.map(|p| p.seq), Some(2));
            assert_eq!(second.tag(), first.tag() + 1);

            // Answer the heartbeat, then hang up
            let pong = Envelope::new(
                first.tag(),
                Messages {
                    pong: Some(Pong { seq: 1 }),
                    status: Some(Status::Ok),
                    ..Default::default()
                },
            );
            let frame = DelimitedCodec::<Messages>::new()
                .encode_frame(&pong)
                .unwrap();
            remote_write.write_all(&frame).await.unwrap();
            remote_write.shutdown().await.unwrap();
        };

        tokio::join!(session, check);
        assert_eq!(stats.errors_total.load(Ordering::Relaxed), 0);
    }
}
