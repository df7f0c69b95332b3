use std::sync::Arc;

use async_trait::async_trait;
use log_common::health::HealthHandle;
use log_common::record::Record;
use log_common::retry::RetryPolicy;
use metrics::counter;
use rdkafka::error::KafkaError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics_consts::{
    COMMIT_FAILURES, DECODE_FAILURES, FETCH_FAILURES, MESSAGES_RECEIVED, RECORDS_ENQUEUED,
};
use crate::queue::RecordQueue;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

/// A message as read from a topic partition, before decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    pub payload: Option<Vec<u8>>,
    pub partition: i32,
    pub offset: i64,
}

/// A partitioned stream of messages for a single topic.
#[async_trait]
pub trait MessageStream: Send + Sync {
    /// Wait for the next message. Errors are transient: the caller retries.
    async fn fetch(&self) -> Result<RawMessage, SourceError>;

    /// Mark `message` as processed, so it is not delivered again to the group.
    fn commit(&self, message: &RawMessage) -> Result<(), SourceError>;
}

/// Reads one topic and feeds the decoded records into the shared queue.
///
/// A message is committed only once its record sits in the queue, or once it
/// is known to be undecodable. Messages in flight when the source is
/// cancelled are left uncommitted and will be read again after a restart.
pub struct SourceAdapter<S> {
    topic: String,
    stream: S,
    queue: Arc<RecordQueue>,
    retry_policy: RetryPolicy,
    liveness: HealthHandle,
}

impl<S: MessageStream> SourceAdapter<S> {
    pub fn new(
        topic: impl Into<String>,
        stream: S,
        queue: Arc<RecordQueue>,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            topic: topic.into(),
            stream,
            queue,
            retry_policy: RetryPolicy::default(),
            liveness,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Run until `shutdown` is cancelled or the queue is closed.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(topic = self.topic, "starting stream source");
        let mut failed_fetches: u32 = 0;

        loop {
            self.liveness.report_healthy();

            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                fetched = self.stream.fetch() => fetched,
            };

            let message = match fetched {
                Ok(message) => {
                    failed_fetches = 0;
                    message
                }
                Err(error) => {
                    let wait = self.retry_policy.time_until_next_retry(failed_fetches);
                    failed_fetches = failed_fetches.saturating_add(1);
                    counter!(FETCH_FAILURES, "topic" => self.topic.clone()).increment(1);
                    warn!(
                        topic = self.topic,
                        attempt = failed_fetches,
                        "failed to fetch message, retrying in {:?}: {}",
                        wait,
                        error
                    );

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(wait) => continue,
                    }
                }
            };
            counter!(MESSAGES_RECEIVED, "topic" => self.topic.clone()).increment(1);

            let record = match self.decode(&message) {
                Ok(record) => record,
                Err(reason) => {
                    counter!(DECODE_FAILURES, "topic" => self.topic.clone()).increment(1);
                    warn!(
                        topic = self.topic,
                        partition = message.partition,
                        offset = message.offset,
                        "dropping undecodable message: {}",
                        reason
                    );
                    self.commit(&message);
                    continue;
                }
            };

            let enqueued = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                enqueued = self.queue.enqueue(record) => enqueued,
            };
            if enqueued.is_err() {
                error!(topic = self.topic, "record queue closed, stopping source");
                break;
            }
            counter!(RECORDS_ENQUEUED, "source" => self.topic.clone()).increment(1);

            self.commit(&message);
        }

        info!(topic = self.topic, "stream source stopped");
    }

    fn decode(&self, message: &RawMessage) -> Result<Record, String> {
        let payload = message.payload.as_deref().ok_or("empty payload")?;
        Record::decode(payload, &self.topic).map_err(|e| e.to_string())
    }

    fn commit(&self, message: &RawMessage) {
        match self.stream.commit(message) {
            Ok(()) => debug!(
                topic = self.topic,
                partition = message.partition,
                offset = message.offset,
                "committed message"
            ),
            Err(error) => {
                counter!(COMMIT_FAILURES, "topic" => self.topic.clone()).increment(1);
                error!(
                    topic = self.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "failed to commit message: {}",
                    error
                );
            }
        }
    }
}
