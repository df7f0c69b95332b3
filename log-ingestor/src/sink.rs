use async_trait::async_trait;
use log_common::record::Record;
use log_common::store::{ElasticClient, StoreError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("store rejected {failed} of {total} records: {reason}")]
    Rejected {
        failed: usize,
        total: usize,
        reason: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Destination of flushed batches.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Write `records` into `index` in one request. Returns the number of
    /// records submitted; records that cannot be serialized are left out.
    async fn write_batch(&self, index: &str, records: Vec<Record>) -> Result<usize, SinkError>;
}

/// Writes batches through the store's bulk API.
pub struct ElasticsearchSink {
    client: ElasticClient,
    refresh: bool,
}

impl ElasticsearchSink {
    pub fn new(client: ElasticClient, refresh: bool) -> Self {
        Self { client, refresh }
    }
}

/// Render `records` as a bulk NDJSON body: an index action line followed by
/// the record itself, for each record. Returns the body and the number of
/// records it holds.
pub fn bulk_payload(index: &str, records: &[Record]) -> (String, usize) {
    let action = serde_json::json!({ "index": { "_index": index } }).to_string();
    let mut payload = String::new();
    let mut written = 0;

    for record in records {
        match serde_json::to_string(record) {
            Ok(line) => {
                payload.push_str(&action);
                payload.push('\n');
                payload.push_str(&line);
                payload.push('\n');
                written += 1;
            }
            Err(e) => warn!(
                topic = record.topic,
                "skipping record that failed to serialize: {}", e
            ),
        }
    }

    (payload, written)
}

#[async_trait]
impl RecordSink for ElasticsearchSink {
    async fn write_batch(&self, index: &str, records: Vec<Record>) -> Result<usize, SinkError> {
        let (payload, total) = bulk_payload(index, &records);
        if total == 0 {
            return Ok(0);
        }

        let response = self.client.bulk(payload, self.refresh).await?;
        if !response.errors {
            return Ok(total);
        }

        let failed: Vec<_> = response.failed_items().collect();
        let reason = failed
            .iter()
            .find_map(|item| item.reason())
            .unwrap_or_else(|| "unknown error".to_owned());

        Err(SinkError::Rejected {
            failed: failed.len(),
            total,
            reason,
        })
    }
}

/// Logs batches instead of writing them, for local runs without a store.
pub struct PrintSink {}

#[async_trait]
impl RecordSink for PrintSink {
    async fn write_batch(&self, index: &str, records: Vec<Record>) -> Result<usize, SinkError> {
        let span = tracing::span!(tracing::Level::INFO, "batch of records", index);
        let _enter = span.enter();

        let total = records.len();
        for record in records {
            info!("record: {:?}", record);
        }

        Ok(total)
    }
}
