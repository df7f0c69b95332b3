use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log_common::health::HealthRegistry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::queue::RecordQueue;
use crate::sink::RecordSink;
use crate::source::{MessageStream, SourceAdapter};
use crate::worker::{BatchPolicy, BatchWorker};

/// Owns the running sources and workers, and shuts them down in order.
pub struct Pipeline {
    queue: Arc<RecordQueue>,
    shutdown: CancellationToken,
    sources: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(queue: Arc<RecordQueue>) -> Self {
        Self {
            queue,
            shutdown: CancellationToken::new(),
            sources: Vec::new(),
            workers: Vec::new(),
        }
    }

    /// The queue the sources and workers share, for other producers.
    pub fn queue(&self) -> Arc<RecordQueue> {
        self.queue.clone()
    }

    /// Cancelled when shutdown starts.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn spawn_source<S>(&mut self, source: SourceAdapter<S>)
    where
        S: MessageStream + 'static,
    {
        self.sources.push(tokio::spawn(source.run(self.shutdown.clone())));
    }

    /// Start `count` batch workers writing to `index` through `sink`. Each
    /// registers with `liveness` and must report at least every `deadline`.
    pub fn spawn_workers(
        &mut self,
        count: NonZeroUsize,
        index: &str,
        sink: Arc<dyn RecordSink>,
        policy: BatchPolicy,
        liveness: &HealthRegistry,
        deadline: Duration,
    ) {
        info!(
            workers = count.get(),
            batch_size = policy.max_size.get(),
            "starting batch workers with a {:?} batch timeout",
            policy.max_age
        );

        for id in 0..count.get() {
            let worker = BatchWorker::new(
                id,
                index,
                self.queue.clone(),
                sink.clone(),
                policy,
                liveness.register(format!("worker-{id}"), deadline),
            );
            self.workers.push(tokio::spawn(worker.run(self.shutdown.clone())));
        }
    }

    /// Stop the sources, close the queue and wait for every worker to flush
    /// its last batch. Records still buffered in the queue are written out.
    pub async fn shutdown(self) {
        info!(buffered = self.queue.len(), "shutting down pipeline");
        self.shutdown.cancel();

        for result in join_all(self.sources).await {
            if let Err(e) = result {
                error!("stream source task failed: {}", e);
            }
        }

        // No producer is left, workers can drain what remains and exit
        self.queue.close();

        for result in join_all(self.workers).await {
            if let Err(e) = result {
                error!("batch worker task failed: {}", e);
            }
        }

        info!("pipeline drained");
    }
}
