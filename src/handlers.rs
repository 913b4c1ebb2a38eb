//! Handlers registered by the demo peer.

use crate::schema::{FileListing, Messages, Ping, Pong, Status};
use tagwire_connection::{HandlerResult, HandlerSet};
use tagwire_protocol::Envelope;

/// Builds the handler set shared by every connection.
pub fn build() -> HandlerSet<Messages> {
    HandlerSet::new()
        .on(on_listing)
        .on(on_ping)
        .on_notify(on_pong)
        .on_notify(on_status)
}

fn on_listing(listing: &FileListing, reply: &mut Envelope<Messages>) -> HandlerResult {
    let status = if listing.path.is_empty() {
        tracing::warn!(tag = reply.tag(), "Listing requested for empty path");
        Status::Error
    } else {
        tracing::info!(tag = reply.tag(), path = %listing.path, "Listing requested");
        Status::Ok
    };
    reply.payloads_mut().status = Some(status);
    Ok(())
}

fn on_ping(ping: &Ping, reply: &mut Envelope<Messages>) -> HandlerResult {
    reply.payloads_mut().pong = Some(Pong { seq: ping.seq });
    Ok(())
}

fn on_pong(pong: &Pong) -> HandlerResult {
    tracing::debug!(seq = pong.seq, "Heartbeat acknowledged");
    Ok(())
}

fn on_status(status: &Status) -> HandlerResult {
    tracing::info!(?status, "Peer reported status");
    Ok(())
}
