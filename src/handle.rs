//! The public façade over a running transport (component 4.7).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::{
    cert::ClientCertificateStore,
    endpoint::Endpoint,
    error::TransportError,
    events::{TransportEvent, EVENT_CHANNEL_CAPACITY},
    options::TransportOptions,
    queue::{ReadRequest, RequestQueues, WriteCompletion, WritePayload, WriteRequest},
    tls_trust::TrustedPeerStore,
    transport_loop::TransportLoop,
};

/// A resilient, duplex, request-oriented transport to a single endpoint.
///
/// Constructing one (via [`TransportHandle::new`]) spawns the owning
/// [`TransportLoop`] task immediately; the transport starts dialing before
/// the constructor returns. `read_async`/`write_async` submit requests to
/// that loop and await its completion of them; they queue safely across
/// disconnects and transparent reconnects.
pub struct TransportHandle {
    endpoint: Endpoint,
    read_producer: crate::queue::QueueProducer<ReadRequest>,
    write_producer: crate::queue::QueueProducer<WriteRequest>,
    events: broadcast::Sender<TransportEvent>,
    shutdown: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
    dispose_timeout: std::time::Duration,
}

impl TransportHandle {
    /// Build a transport to `endpoint` and spawn its owning loop.
    ///
    /// `cert_store` and `trusted_peers` are only consulted if
    /// `options.tls` is set; callers that never use TLS may pass any
    /// implementation (e.g. [`crate::cert::FileCertificateStore`] and
    /// [`crate::tls_trust::NullTrustedPeerStore`]).
    pub fn new(
        endpoint: Endpoint,
        options: TransportOptions,
        cert_store: Arc<dyn ClientCertificateStore>,
        trusted_peers: Arc<dyn TrustedPeerStore>,
    ) -> Arc<Self> {
        let (events_tx, _events_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let queues = RequestQueues::new(options.read_queue_capacity, options.write_queue_capacity);
        let shutdown = CancellationToken::new();
        let dispose_timeout = options.dispose_timeout;

        let transport_loop = TransportLoop {
            endpoint: endpoint.clone(),
            options,
            cert_store,
            trusted_peers,
            read_consumer: queues.read_consumer,
            write_consumer: queues.write_consumer,
            events: events_tx.clone(),
            shutdown: shutdown.clone(),
        };

        let span = info_span!("transport", endpoint = %endpoint);
        let loop_handle = tokio::spawn(transport_loop.run().instrument(span));
        info!(%endpoint, "transport started");

        Arc::new(TransportHandle {
            endpoint,
            read_producer: queues.read_producer,
            write_producer: queues.write_producer,
            events: events_tx,
            shutdown,
            loop_handle: Mutex::new(Some(loop_handle)),
            disposed: AtomicBool::new(false),
            dispose_timeout,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Subscribe to the transport's observability events. Each subscriber
    /// gets its own buffered receiver; a subscriber that falls more than
    /// [`EVENT_CHANNEL_CAPACITY`] events behind sees a `Lagged` error rather
    /// than stalling the transport.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Read exactly `size` bytes from the connection, transparently
    /// surviving reconnects. `cancel`, if given, lets the caller abandon the
    /// request; a read cancelled before any bytes arrived completes with
    /// [`TransportError::Cancelled`] without affecting the session, while one
    /// cancelled mid-stream forces a reconnect (spec.md §4.6 edge cases).
    pub async fn read_async(
        &self,
        size: u32,
        cancel: Option<CancellationToken>,
    ) -> Result<Vec<u8>, TransportError> {
        if size == 0 {
            return Ok(Vec::new());
        }
        if self.disposed.load(Ordering::Acquire) {
            return Err(TransportError::Disposed);
        }

        let (result, receiver) = oneshot::channel();
        let cancel = cancel.unwrap_or_else(|| self.shutdown.child_token());
        self.read_producer
            .push(ReadRequest {
                size,
                result,
                cancel,
            })
            .await?;
        receiver.await.unwrap_or(Err(TransportError::Disposed))
    }

    /// Write `payload` to the connection, transparently surviving
    /// reconnects up to the point the write is actually issued against the
    /// socket; once bytes have left the process a failure forces a
    /// reconnect rather than silently retrying (spec.md §4.6).
    pub async fn write_async(
        &self,
        payload: WritePayload,
        cancel: Option<CancellationToken>,
    ) -> Result<WriteCompletion, TransportError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(TransportError::Disposed);
        }

        let (result, receiver) = oneshot::channel();
        let cancel = cancel.unwrap_or_else(|| self.shutdown.child_token());
        self.write_producer
            .push(WriteRequest {
                payload,
                result,
                cancel,
            })
            .await?;
        receiver.await.unwrap_or(Err(TransportError::Disposed))
    }

    /// Idempotent, graceful shutdown. Signals the owning loop to stop,
    /// waits up to `dispose_timeout` (spec.md default 30s) for it to exit,
    /// then returns regardless of whether it did — any request still queued
    /// or in flight fails with [`TransportError::Disposed`].
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();

        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(self.dispose_timeout, handle)
                .await
                .is_err()
            {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    timeout = ?self.dispose_timeout,
                    "transport loop did not exit within dispose timeout"
                );
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
