//! The single owning task that holds the live stream (component 4.6).
//!
//! Mirrors the outer/inner loop structure of spec.md §4.6 directly: an
//! outer loop that re-establishes a session after any failure, and an inner
//! loop that gates each direction's next operation on "the previous
//! operation for that direction has completed AND its queue is non-empty".

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    backoff::BackoffPolicy,
    cert::ClientCertificateStore,
    connection::{self, IoStream},
    endpoint::Endpoint,
    error::TransportError,
    events::TransportEvent,
    options::TransportOptions,
    queue::{fail_read, fail_write, QueueConsumer, ReadRequest, WriteCompletion, WriteRequest},
    tls_trust::TrustedPeerStore,
};

type BoxedOp<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

/// Everything the loop needs; owned exclusively by the task spawned from
/// [`TransportHandle::new`](crate::handle::TransportHandle::new).
pub struct TransportLoop {
    pub endpoint: Endpoint,
    pub options: TransportOptions,
    pub cert_store: Arc<dyn ClientCertificateStore>,
    pub trusted_peers: Arc<dyn TrustedPeerStore>,
    pub read_consumer: QueueConsumer<ReadRequest>,
    pub write_consumer: QueueConsumer<WriteRequest>,
    pub events: broadcast::Sender<TransportEvent>,
    pub shutdown: CancellationToken,
}

enum SessionOutcome {
    Disposed,
    Disconnected,
}

impl TransportLoop {
    /// The outer loop of spec.md §4.6. Runs until disposed.
    pub async fn run(mut self) {
        loop {
            match self.run_session().await {
                SessionOutcome::Disposed => {
                    self.drain_queues();
                    debug!(endpoint = %self.endpoint, "transport loop exiting after dispose");
                    return;
                }
                SessionOutcome::Disconnected => {
                    let _ = self.events.send(TransportEvent::ServerDisconnected {
                        endpoint: self.endpoint.clone(),
                    });
                    continue;
                }
            }
        }
    }

    fn drain_queues(&mut self) {
        self.read_consumer
            .close_and_drain(|req| fail_read(req, TransportError::Disposed));
        self.write_consumer
            .close_and_drain(|req| fail_write(req, TransportError::Disposed));
    }

    async fn run_session(&mut self) -> SessionOutcome {
        let mut backoff = self.options.backoff_policy();
        let stream = match self.ensure_connected(&mut backoff).await {
            Some(stream) => stream,
            None => return SessionOutcome::Disposed,
        };
        self.serve_session(stream).await
    }

    /// Connect with backoff (component 4.1 + 4.4), emitting
    /// `OnReconnectionAttempt` on every attempt and resetting the backoff on
    /// success. Returns `None` if shutdown fires while reconnecting.
    async fn ensure_connected(&mut self, backoff: &mut BackoffPolicy) -> Option<IoStream> {
        let mut attempt: u32 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }
            attempt += 1;
            let _ = self.events.send(TransportEvent::ReconnectionAttempt {
                endpoint: self.endpoint.clone(),
                attempt,
            });

            let span = info_span!("connect", endpoint = %self.endpoint, attempt);
            let result = connection::connect(
                &self.endpoint,
                &self.options,
                self.cert_store.as_ref(),
                self.trusted_peers.as_ref(),
            )
            .instrument(span)
            .await;

            match result {
                Ok(stream) => {
                    info!(endpoint = %self.endpoint, attempt, "connected");
                    backoff.reset();
                    return Some(stream);
                }
                Err(err) => {
                    warn!(endpoint = %self.endpoint, attempt, error = %err, "connect attempt failed");
                    let delay = backoff.next();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => return None,
                    }
                }
            }
        }
    }

    /// The inner loop of spec.md §4.6: at most one in-flight read and one
    /// in-flight write, each started as soon as the previous one for that
    /// direction has completed and its queue is non-empty.
    async fn serve_session(&mut self, stream: IoStream) -> SessionOutcome {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let mut write_op: Option<BoxedOp<'_>> = None;
        let mut read_op: Option<BoxedOp<'_>> = None;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled(), if write_op.is_none() && read_op.is_none() => {
                    break SessionOutcome::Disposed;
                }

                maybe_req = self.write_consumer.recv(), if write_op.is_none() => {
                    match maybe_req {
                        Some(req) => {
                            write_op = Some(Box::pin(process_write(
                                &mut write_half,
                                req,
                                &self.events,
                                &self.endpoint,
                                &self.shutdown,
                            )));
                        }
                        None => break SessionOutcome::Disposed,
                    }
                }

                maybe_req = self.read_consumer.recv(), if read_op.is_none() => {
                    match maybe_req {
                        Some(req) => {
                            read_op = Some(Box::pin(process_read(
                                &mut read_half,
                                req,
                                &self.events,
                                &self.endpoint,
                                &self.shutdown,
                            )));
                        }
                        None => break SessionOutcome::Disposed,
                    }
                }

                result = poll_op(&mut write_op), if write_op.is_some() => {
                    write_op = None;
                    if let Some(outcome) = outcome_of(result) {
                        break outcome;
                    }
                }

                result = poll_op(&mut read_op), if read_op.is_some() => {
                    read_op = None;
                    if let Some(outcome) = outcome_of(result) {
                        break outcome;
                    }
                }
            }
        };

        // Drop any operation still in flight so its borrow of `write_half`
        // ends before we try to shut the stream down cleanly.
        drop(write_op);
        drop(read_op);

        if matches!(outcome, SessionOutcome::Disposed) {
            let _ = write_half.shutdown().await;
        }

        outcome
    }
}

/// Await whichever in-flight operation future is present, or never resolve
/// if there is none — lets `tokio::select!`'s `if` guard do the real work of
/// deciding whether this branch is live this iteration.
async fn poll_op(op: &mut Option<BoxedOp<'_>>) -> Result<(), TransportError> {
    match op.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

/// Translate a completed operation's result into whether the session should
/// end, and if so, how.
fn outcome_of(result: Result<(), TransportError>) -> Option<SessionOutcome> {
    match result {
        Ok(()) => None,
        Err(TransportError::Disposed) => Some(SessionOutcome::Disposed),
        Err(err) if err.terminates_session() => Some(SessionOutcome::Disconnected),
        Err(_) => None,
    }
}

/// spec.md §4.6 `process_write`.
async fn process_write(
    write_half: &mut WriteHalf<IoStream>,
    req: WriteRequest,
    events: &broadcast::Sender<TransportEvent>,
    endpoint: &Endpoint,
    shutdown: &CancellationToken,
) -> Result<(), TransportError> {
    let _ = events.send(TransportEvent::WriteToSocketAttempt {
        endpoint: endpoint.clone(),
        correlation_id: req.payload.correlation_id,
        api_key: req.payload.api_key,
        message_count: req.payload.message_count,
    });

    let outcome: Result<(), TransportError> = tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(TransportError::Disposed),
        result = write_half.write_all(&req.payload.buffer) => result.map_err(TransportError::from),
    };

    match outcome {
        Ok(()) => {
            let completion = WriteCompletion {
                correlation_id: req.payload.correlation_id,
                api_key: req.payload.api_key,
                message_count: req.payload.message_count,
                bytes_written: req.payload.buffer.len(),
            };
            let _ = req.result.send(Ok(completion));
            Ok(())
        }
        Err(err) => {
            let _ = req.result.send(Err(err.clone()));
            Err(err)
        }
    }
}

enum ReadOutcome {
    Read(std::io::Result<usize>),
    Cancelled,
    Disposed,
}

/// spec.md §4.6 `process_read`.
async fn process_read(
    read_half: &mut ReadHalf<IoStream>,
    req: ReadRequest,
    events: &broadcast::Sender<TransportEvent>,
    endpoint: &Endpoint,
    shutdown: &CancellationToken,
) -> Result<(), TransportError> {
    debug_assert!(req.size > 0, "ReadRequest::size must be > 0");

    let mut accumulated = Vec::with_capacity(req.size as usize);
    let mut bytes_received: u32 = 0;

    while bytes_received < req.size {
        let remaining = req.size - bytes_received;
        let _ = events.send(TransportEvent::ReadFromSocketAttempt {
            endpoint: endpoint.clone(),
            remaining,
        });

        let mut buf = vec![0u8; remaining as usize];
        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => ReadOutcome::Disposed,
            _ = req.cancel.cancelled() => ReadOutcome::Cancelled,
            result = read_half.read(&mut buf) => ReadOutcome::Read(result),
        };

        match outcome {
            ReadOutcome::Disposed => {
                let _ = req.result.send(Err(TransportError::Disposed));
                return Err(TransportError::Disposed);
            }
            ReadOutcome::Cancelled => {
                // A read that has already consumed part of the response
                // leaves the stream at an undefined framing position for
                // whoever reads next; treat that case as a dead session
                // rather than risk a desynchronized read downstream.
                if bytes_received > 0 {
                    let _ = req.result.send(Err(TransportError::ServerDisconnected));
                    return Err(TransportError::ServerDisconnected);
                }
                let _ = req.result.send(Err(TransportError::Cancelled));
                return Ok(());
            }
            ReadOutcome::Read(Ok(0)) => {
                let _ = events.send(TransportEvent::BytesReceived {
                    endpoint: endpoint.clone(),
                    n: 0,
                });
                let _ = req.result.send(Err(TransportError::ServerDisconnected));
                return Err(TransportError::ServerDisconnected);
            }
            ReadOutcome::Read(Ok(n)) => {
                let _ = events.send(TransportEvent::BytesReceived {
                    endpoint: endpoint.clone(),
                    n,
                });
                accumulated.extend_from_slice(&buf[..n]);
                bytes_received += n as u32;
            }
            ReadOutcome::Read(Err(io_err)) => {
                let err = TransportError::from(io_err);
                let _ = req.result.send(Err(err.clone()));
                return Err(err);
            }
        }
    }

    let _ = req.result.send(Ok(accumulated));
    Ok(())
}
