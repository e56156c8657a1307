//! Bounded, single-consumer request queues (component 4.5).
//!
//! The source's queues are unbounded FIFOs with a `push` / `wait_available`
//! / `try_pop` / `close_and_drain` contract. This realization keeps that
//! contract but bounds each queue (see SPEC_FULL.md, "Backpressure"):
//! `push` is an `async fn` that applies backpressure once the bound is hit,
//! rather than failing or growing without limit.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// A pending read of exactly `size` bytes.
#[derive(Debug)]
pub struct ReadRequest {
    pub size: u32,
    pub result: oneshot::Sender<Result<Vec<u8>, TransportError>>,
    pub cancel: CancellationToken,
}

/// The opaque payload of a write, plus the observability metadata that
/// accompanies it. The buffer is never interpreted by the transport.
#[derive(Debug, Clone)]
pub struct WritePayload {
    pub buffer: Vec<u8>,
    pub correlation_id: i32,
    pub api_key: u16,
    pub message_count: u32,
}

/// What a successful write completes with: the same metadata the caller
/// submitted, plus the number of bytes actually written.
#[derive(Debug, Clone)]
pub struct WriteCompletion {
    pub correlation_id: i32,
    pub api_key: u16,
    pub message_count: u32,
    pub bytes_written: usize,
}

#[derive(Debug)]
pub struct WriteRequest {
    pub payload: WritePayload,
    pub result: oneshot::Sender<Result<WriteCompletion, TransportError>>,
    pub cancel: CancellationToken,
}

/// The producer side of a bounded, single-consumer FIFO: many callers may
/// clone and push into it; exactly one [`QueueConsumer`] drains it.
#[derive(Clone)]
pub struct QueueProducer<T> {
    sender: mpsc::Sender<T>,
    closed: Arc<AtomicBool>,
}

impl<T> QueueProducer<T> {
    /// Enqueue `item`. Fails with [`TransportError::Disposed`] once the
    /// queue has been closed, even if the underlying channel could still
    /// technically accept the item.
    pub async fn push(&self, item: T) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Disposed);
        }
        self.sender
            .send(item)
            .await
            .map_err(|_| TransportError::Disposed)
    }
}

/// The single-consumer side of the queue, owned exclusively by the
/// [`TransportLoop`](crate::transport_loop).
pub struct QueueConsumer<T> {
    receiver: mpsc::Receiver<T>,
    closed: Arc<AtomicBool>,
}

impl<T> QueueConsumer<T> {
    /// Wait for and remove the next item. Resolves to `None` once the queue
    /// is closed and drained — this fuses the source's `wait_available` and
    /// `try_pop` into a single suspension point, since nothing meaningful
    /// happens between "became available" and "was popped" for a
    /// single-consumer queue.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Non-blocking pop, for callers that already know (e.g. via `recv`
    /// racing against other futures in a `select!`) that an item is likely
    /// present.
    pub fn try_pop(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Mark the queue closed and fail every request still queued.
    /// Idempotent.
    pub fn close_and_drain(&mut self, fail_each: impl Fn(T)) {
        self.closed.store(true, Ordering::Release);
        while let Ok(item) = self.receiver.try_recv() {
            fail_each(item);
        }
    }
}

/// Construct a producer/consumer pair with the given bound.
pub fn bounded<T>(capacity: usize) -> (QueueProducer<T>, QueueConsumer<T>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let closed = Arc::new(AtomicBool::new(false));
    (
        QueueProducer {
            sender,
            closed: closed.clone(),
        },
        QueueConsumer { receiver, closed },
    )
}

/// The two independent FIFOs a transport multiplexes: one for reads, one
/// for writes. No ordering is promised between them.
pub struct RequestQueues {
    pub read_producer: QueueProducer<ReadRequest>,
    pub read_consumer: QueueConsumer<ReadRequest>,
    pub write_producer: QueueProducer<WriteRequest>,
    pub write_consumer: QueueConsumer<WriteRequest>,
}

impl RequestQueues {
    pub fn new(read_capacity: usize, write_capacity: usize) -> Self {
        let (read_producer, read_consumer) = bounded(read_capacity);
        let (write_producer, write_consumer) = bounded(write_capacity);
        RequestQueues {
            read_producer,
            read_consumer,
            write_producer,
            write_consumer,
        }
    }
}

/// Complete `result` with `Err(error)`, ignoring a dropped receiver (the
/// caller may have already given up and stopped polling the future).
pub fn fail_read(req: ReadRequest, error: TransportError) {
    let _ = req.result.send(Err(error));
}

pub fn fail_write(req: WriteRequest, error: TransportError) {
    let _ = req.result.send(Err(error));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_after_close_fails_disposed() {
        let (producer, mut consumer) = bounded::<u32>(4);
        consumer.close_and_drain(|_| {});
        let err = producer.push(1).await.unwrap_err();
        assert!(matches!(err, TransportError::Disposed));
    }

    #[tokio::test]
    async fn close_and_drain_fails_queued_items() {
        let (read_producer, mut read_consumer) = bounded::<ReadRequest>(4);
        let (tx, rx) = oneshot::channel();
        read_producer
            .push(ReadRequest {
                size: 10,
                result: tx,
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();

        read_consumer.close_and_drain(|req| fail_read(req, TransportError::Disposed));
        let result = rx.await.unwrap();
        assert!(matches!(result, Err(TransportError::Disposed)));
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let (producer, mut consumer) = bounded::<u32>(4);
        producer.push(1).await.unwrap();
        producer.push(2).await.unwrap();
        producer.push(3).await.unwrap();
        assert_eq!(consumer.recv().await, Some(1));
        assert_eq!(consumer.recv().await, Some(2));
        assert_eq!(consumer.recv().await, Some(3));
    }
}
