use std::num::NonZeroUsize;

use log_common::record::Record;
use metrics::gauge;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::metrics_consts::QUEUE_DEPTH;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("record queue is closed")]
    Closed,
}

/// Fixed-capacity FIFO shared by every producer (stream sources, the HTTP
/// ingestion route) and every batch worker.
///
/// Enqueue waits while the queue is full, which is how a slow store pushes
/// back on the stream consumers. Closing is one-way: producers get
/// `QueueError::Closed` from then on, while consumers keep receiving the
/// records that were already buffered and only then see `None`.
pub struct RecordQueue {
    sender: mpsc::Sender<Record>,
    // Workers take turns waiting on the receiver
    receiver: Mutex<mpsc::Receiver<Record>>,
    closed: CancellationToken,
    capacity: NonZeroUsize,
}

impl RecordQueue {
    pub fn new(capacity: NonZeroUsize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.get());
        Self {
            sender,
            receiver: Mutex::new(receiver),
            closed: CancellationToken::new(),
            capacity,
        }
    }

    /// Wait for a free slot and append `record`. Fails if the queue is closed
    /// before or while waiting.
    pub async fn enqueue(&self, record: Record) -> Result<(), QueueError> {
        if self.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }

        let permit = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(QueueError::Closed),
            permit = self.sender.reserve() => permit.map_err(|_| QueueError::Closed)?,
        };
        permit.send(record);

        gauge!(QUEUE_DEPTH).set(self.len() as f64);
        Ok(())
    }

    /// Wait for the next record. Returns `None` once the queue is closed and
    /// every buffered record has been handed out.
    pub async fn dequeue(&self) -> Option<Record> {
        let mut receiver = self.receiver.lock().await;

        let record = tokio::select! {
            biased;
            record = receiver.recv() => record,
            _ = self.closed.cancelled() => receiver.try_recv().ok(),
        };

        if record.is_some() {
            gauge!(QUEUE_DEPTH).set(self.len() as f64);
        }
        record
    }

    /// Refuse new records and wake up every waiting worker. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.capacity.get() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }
}
