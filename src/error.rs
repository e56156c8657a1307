//! The error taxonomy for the transport.
//!
//! These are semantic categories, not a one-to-one mirror of any particular
//! underlying library's error type: every failure that can reach a caller or
//! an observability event is one of the variants below.

use std::{io, sync::Arc};

use thiserror::Error;

/// Errors surfaced by the transport, either to a caller's `read_async`/
/// `write_async` future or to the [`TransportLoop`](crate::transport_loop).
///
/// `Clone` is implemented (wrapping sources in `Arc`) because the same error
/// is sometimes both completed to a caller's promise and logged/emitted as
/// an event from the owning loop.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Raised after `dispose()`; terminal for the transport.
    #[error("transport has been disposed")]
    Disposed,

    /// The TCP or TLS stream ended, or a read returned zero bytes.
    #[error("server disconnected")]
    ServerDisconnected,

    /// A connect attempt failed. Connect failures are absorbed and retried
    /// by the backoff loop; this variant is only surfaced if a caller
    /// explicitly asks about the most recent failure.
    #[error("failed to connect: {0}")]
    ConnectFailed(#[source] Arc<io::Error>),

    /// No certificate matching the configured reference was found in the
    /// certificate store.
    #[error("no client certificate found matching {0:?}")]
    CertificateNotFound(String),

    /// A certificate file existed but could not be loaded (bad PFX,
    /// wrong password, corrupt encoding, ...).
    #[error("failed to load client certificate: {0}")]
    CertificateLoadFailed(#[source] Arc<io::Error>),

    /// The TLS handshake itself was rejected (by us, via [`TlsTrustPolicy`](crate::tls_trust),
    /// or by the peer). Treated the same as [`TransportError::ServerDisconnected`]
    /// by the reconnect loop.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(#[source] Arc<io::Error>),

    /// The caller cancelled the request via its `CancelToken`.
    #[error("request was cancelled")]
    Cancelled,

    /// Any other I/O failure not covered by a more specific variant.
    #[error("I/O failure: {0}")]
    IoFailure(#[source] Arc<io::Error>),
}

impl TransportError {
    /// True for errors that mean "the session is dead, force a reconnect",
    /// as opposed to errors that are purely local to one request (e.g.
    /// [`TransportError::Cancelled`]).
    pub fn terminates_session(&self) -> bool {
        matches!(
            self,
            TransportError::ServerDisconnected
                | TransportError::IoFailure(_)
                | TransportError::HandshakeFailed(_)
        )
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::IoFailure(Arc::new(err))
    }
}

impl From<native_tls::Error> for TransportError {
    fn from(err: native_tls::Error) -> Self {
        TransportError::HandshakeFailed(Arc::new(io::Error::new(io::ErrorKind::Other, err)))
    }
}
