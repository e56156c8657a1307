//! Observability events (spec.md §4.7 / §6).
//!
//! The source models these as five separate delegate-backed multicast
//! events. Idiomatic Rust favors one sum type with many subscribers over
//! five parallel registration methods (Design Notes, "Event multicast"), so
//! all five are carried by a single [`TransportEvent`] broadcast from the
//! owning [`TransportLoop`](crate::transport_loop).

use crate::endpoint::Endpoint;

/// A single observability event. Subscribers receive every variant and
/// pattern-match the ones they care about.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The loop is about to attempt connection number `attempt` (1-based).
    ReconnectionAttempt { endpoint: Endpoint, attempt: u32 },
    /// The live session ended because the server (or the underlying
    /// stream) disconnected.
    ServerDisconnected { endpoint: Endpoint },
    /// A read of up to `remaining` bytes is about to be issued against the
    /// socket.
    ReadFromSocketAttempt { endpoint: Endpoint, remaining: u32 },
    /// `n` bytes were just received for an in-flight read (may be emitted
    /// more than once per request, for a split read).
    BytesReceived { endpoint: Endpoint, n: usize },
    /// A write of `payload` metadata is about to be issued against the
    /// socket.
    WriteToSocketAttempt {
        endpoint: Endpoint,
        correlation_id: i32,
        api_key: u16,
        message_count: u32,
    },
}

/// Capacity of the broadcast channel backing [`subscribe`](crate::handle::TransportHandle::subscribe).
/// Slow subscribers that fall behind this many events see
/// [`tokio::sync::broadcast::error::RecvError::Lagged`] rather than stalling
/// the transport loop, per spec.md §5 ("subscribers must not block it").
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
