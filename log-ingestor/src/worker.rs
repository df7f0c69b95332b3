use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use log_common::health::HealthHandle;
use log_common::record::Record;
use metrics::{counter, histogram};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::metrics_consts::{
    BATCHES_FAILED, BATCHES_FLUSHED, BATCH_SIZE, FLUSH_DURATION, RECORDS_DROPPED, RECORDS_FLUSHED,
};
use crate::queue::RecordQueue;
use crate::sink::RecordSink;

/// When a worker flushes: as soon as the batch holds `max_size` records, or
/// once its oldest record has waited for `max_age`.
#[derive(Clone, Copy, Debug)]
pub struct BatchPolicy {
    pub max_size: NonZeroUsize,
    pub max_age: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Timeout,
    Shutdown,
    Closed,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Timeout => "timeout",
            FlushTrigger::Shutdown => "shutdown",
            FlushTrigger::Closed => "closed",
        }
    }
}

/// Drains the shared queue into batches and writes them to the sink.
///
/// After `shutdown` fires the worker flushes what it holds and keeps draining
/// until the queue is closed and empty, then flushes its tail and returns.
/// A failed batch is logged and dropped, never retried.
pub struct BatchWorker {
    id: usize,
    index: String,
    queue: Arc<RecordQueue>,
    sink: Arc<dyn RecordSink>,
    policy: BatchPolicy,
    liveness: HealthHandle,
}

impl BatchWorker {
    pub fn new(
        id: usize,
        index: impl Into<String>,
        queue: Arc<RecordQueue>,
        sink: Arc<dyn RecordSink>,
        policy: BatchPolicy,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            id,
            index: index.into(),
            queue,
            sink,
            policy,
            liveness,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        debug!(worker = self.id, "starting batch worker");

        let mut batch: Vec<Record> = Vec::with_capacity(self.policy.max_size.get());
        // Arrival of the oldest record in the batch
        let mut oldest: Option<Instant> = None;
        let mut draining = false;

        loop {
            self.liveness.report_healthy();

            // An empty batch has nothing to flush, but still wakes up to report liveness
            let wake_at = oldest.unwrap_or_else(Instant::now) + self.policy.max_age;

            tokio::select! {
                biased;

                // Fires once: records can still arrive until the queue is closed
                _ = shutdown.cancelled(), if !draining => {
                    draining = true;
                    debug!(worker = self.id, "shutdown requested, draining queue");
                    self.flush(&mut batch, FlushTrigger::Shutdown).await;
                    oldest = None;
                }

                _ = sleep_until(wake_at) => {
                    self.flush(&mut batch, FlushTrigger::Timeout).await;
                    oldest = None;
                }

                record = self.queue.dequeue() => match record {
                    Some(record) => {
                        if batch.is_empty() {
                            oldest = Some(Instant::now());
                        }
                        batch.push(record);

                        if batch.len() >= self.policy.max_size.get() {
                            self.flush(&mut batch, FlushTrigger::Size).await;
                            oldest = None;
                        }
                    }
                    None => {
                        self.flush(&mut batch, FlushTrigger::Closed).await;
                        break;
                    }
                },
            }
        }

        debug!(worker = self.id, "batch worker stopped");
    }

    async fn flush(&self, batch: &mut Vec<Record>, trigger: FlushTrigger) {
        if batch.is_empty() {
            return;
        }

        let records = std::mem::replace(batch, Vec::with_capacity(self.policy.max_size.get()));
        let size = records.len();
        let labels = [("trigger", trigger.as_str())];
        histogram!(BATCH_SIZE).record(size as f64);

        let start = Instant::now();
        match self.sink.write_batch(&self.index, records).await {
            Ok(written) => {
                counter!(BATCHES_FLUSHED, &labels).increment(1);
                counter!(RECORDS_FLUSHED).increment(written as u64);
                counter!(RECORDS_DROPPED).increment(size.saturating_sub(written) as u64);
                debug!(
                    worker = self.id,
                    trigger = trigger.as_str(),
                    size,
                    written,
                    "flushed batch"
                );
            }
            Err(e) => {
                counter!(BATCHES_FAILED, &labels).increment(1);
                counter!(RECORDS_DROPPED).increment(size as u64);
                error!(
                    worker = self.id,
                    trigger = trigger.as_str(),
                    size,
                    "failed to flush batch: {}",
                    e
                );
            }
        }
        histogram!(FLUSH_DURATION).record(start.elapsed().as_secs_f64());

        if trigger == FlushTrigger::Closed {
            info!(worker = self.id, size, "flushed final batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use log_common::health::HealthRegistry;
    use tokio_util::sync::CancellationToken;

    use super::{BatchPolicy, BatchWorker};
    use crate::queue::RecordQueue;
    use crate::sink::RecordSink;
    use crate::test_utils::{record, FailingSink, MemorySink};

    const MAX_AGE: Duration = Duration::from_secs(5);

    fn queue() -> Arc<RecordQueue> {
        Arc::new(RecordQueue::new(NonZeroUsize::new(100).unwrap()))
    }

    fn worker(queue: &Arc<RecordQueue>, sink: Arc<dyn RecordSink>) -> BatchWorker {
        let registry = HealthRegistry::new("liveness");
        BatchWorker::new(
            0,
            "ingestor",
            queue.clone(),
            sink,
            BatchPolicy {
                max_size: NonZeroUsize::new(10).unwrap(),
                max_age: MAX_AGE,
            },
            registry.register("worker-0", MAX_AGE * 2),
        )
    }

    async fn fill(queue: &RecordQueue, count: usize) {
        for i in 0..count {
            queue
                .enqueue(record("auth", "info", &format!("message {i}")))
                .await
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_full_batches_immediately() {
        let queue = queue();
        let sink = MemorySink::default();
        fill(&queue, 25).await;

        let worker = worker(&queue, Arc::new(sink.clone()));
        let task = tokio::spawn(worker.run(CancellationToken::new()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sink.batch_sizes(), vec![10, 10]);

        // The tail waits for the oldest record to age out
        tokio::time::sleep(MAX_AGE - Duration::from_millis(100)).await;
        assert_eq!(sink.batch_sizes(), vec![10, 10]);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.batch_sizes(), vec![10, 10, 5]);

        queue.close();
        task.await.unwrap();
        assert_eq!(sink.len(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_anchored_to_oldest_record() {
        let queue = queue();
        let sink = MemorySink::default();
        let worker = worker(&queue, Arc::new(sink.clone()));
        let task = tokio::spawn(worker.run(CancellationToken::new()));

        fill(&queue, 1).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        fill(&queue, 1).await;

        // A later arrival does not push the deadline back
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(sink.batch_sizes(), vec![2]);

        queue.close();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn never_flushes_empty_batches() {
        let queue = queue();
        let sink = MemorySink::default();
        let worker = worker(&queue, Arc::new(sink.clone()));
        let task = tokio::spawn(worker.run(CancellationToken::new()));

        tokio::time::sleep(MAX_AGE * 10).await;
        queue.close();
        task.await.unwrap();

        assert!(sink.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_then_drains_until_closed() {
        let queue = queue();
        let sink = MemorySink::default();
        let shutdown = CancellationToken::new();
        let worker = worker(&queue, Arc::new(sink.clone()));
        let task = tokio::spawn(worker.run(shutdown.clone()));

        fill(&queue, 3).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sink.batch_sizes(), vec![3]);

        // Still running: records enqueued before closure are not lost
        fill(&queue, 2).await;
        queue.close();
        task.await.unwrap();

        assert_eq!(sink.batch_sizes(), vec![3, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batches_are_dropped_not_retried() {
        let queue = queue();
        let sink = FailingSink::default();
        fill(&queue, 20).await;

        let worker = worker(&queue, Arc::new(sink.clone()));
        let task = tokio::spawn(worker.run(CancellationToken::new()));
        tokio::time::sleep(MAX_AGE * 2).await;
        queue.close();
        task.await.unwrap();

        assert_eq!(sink.attempts(), 2);
        assert!(queue.is_empty());
    }
}
