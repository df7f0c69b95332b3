//! In-memory fakes for the pipeline seams, shared by unit and integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log_common::query::{LogQuery, Page};
use log_common::record::Record;
use log_common::store::{LogStore, SearchResults, StoreError, StoredRecord};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use serde_json::json;
use time::OffsetDateTime;

use crate::sink::{RecordSink, SinkError};
use crate::source::{MessageStream, RawMessage, SourceError};

/// Build a record with a fixed timestamp.
pub fn record(topic: &str, level: &str, message: &str) -> Record {
    Record {
        level: level.to_owned(),
        message: message.to_owned(),
        resource_id: "server-1234".to_owned(),
        timestamp: OffsetDateTime::UNIX_EPOCH,
        trace_id: String::new(),
        span_id: String::new(),
        commit: String::new(),
        metadata: Default::default(),
        topic: topic.to_owned(),
    }
}

/// JSON payload of a record as producers write it to a topic.
pub fn payload(level: &str, message: &str) -> Vec<u8> {
    json!({
        "level": level,
        "message": message,
        "resourceId": "server-1234",
        "timestamp": "2023-09-15T08:00:00Z",
        "traceId": "abc-xyz-123",
        "spanId": "span-456",
        "commit": "5e5342f",
        "metadata": { "parentResourceId": "server-0987" }
    })
    .to_string()
    .into_bytes()
}

/// Offsets committed by a `ScriptedStream`, in commit order.
#[derive(Clone, Default)]
pub struct CommitLog(Arc<Mutex<Vec<i64>>>);

impl CommitLog {
    pub fn offsets(&self) -> Vec<i64> {
        self.0.lock().map(|offsets| offsets.clone()).unwrap_or_default()
    }
}

/// Replays a fixed script of messages and fetch failures on a single
/// partition, then waits forever like an idle topic.
#[derive(Default)]
pub struct ScriptedStream {
    script: Mutex<VecDeque<Option<Option<Vec<u8>>>>>,
    next_offset: Mutex<i64>,
    commits: CommitLog,
}

impl ScriptedStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(self, payload: Vec<u8>) -> Self {
        self.raw(Some(payload))
    }

    /// A message with an arbitrary, possibly missing, payload.
    pub fn raw(self, payload: Option<Vec<u8>>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Some(payload));
        }
        self
    }

    /// A transient fetch failure.
    pub fn failure(self) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(None);
        }
        self
    }

    pub fn commits(&self) -> CommitLog {
        self.commits.clone()
    }

    fn next(&self) -> Option<Result<RawMessage, SourceError>> {
        let step = self.script.lock().ok()?.pop_front()?;
        let Some(payload) = step else {
            return Some(Err(KafkaError::MessageConsumption(
                RDKafkaErrorCode::BrokerTransportFailure,
            )
            .into()));
        };

        let mut next_offset = self.next_offset.lock().ok()?;
        let offset = *next_offset;
        *next_offset += 1;
        Some(Ok(RawMessage {
            payload,
            partition: 0,
            offset,
        }))
    }
}

#[async_trait]
impl MessageStream for ScriptedStream {
    async fn fetch(&self) -> Result<RawMessage, SourceError> {
        match self.next() {
            Some(fetched) => fetched,
            None => std::future::pending().await,
        }
    }

    fn commit(&self, message: &RawMessage) -> Result<(), SourceError> {
        if let Ok(mut offsets) = self.commits.0.lock() {
            offsets.push(message.offset);
        }
        Ok(())
    }
}

/// Keeps every flushed batch, in flush order.
#[derive(Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Vec<Record>>>>,
    latency: Duration,
}

impl MemorySink {
    /// A sink taking `latency` to acknowledge every batch.
    pub fn slow(latency: Duration) -> Self {
        Self {
            batches: Default::default(),
            latency,
        }
    }

    pub fn batches(&self) -> Vec<Vec<Record>> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches().iter().map(Vec::len).collect()
    }

    pub fn len(&self) -> usize {
        self.batch_sizes().iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write_batch(&self, _index: &str, records: Vec<Record>) -> Result<usize, SinkError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let total = records.len();
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(records);
        }
        Ok(total)
    }
}

/// Rejects every batch, counting the attempts.
#[derive(Clone, Default)]
pub struct FailingSink {
    attempts: Arc<Mutex<usize>>,
}

impl FailingSink {
    pub fn attempts(&self) -> usize {
        self.attempts.lock().map(|a| *a).unwrap_or_default()
    }
}

#[async_trait]
impl RecordSink for FailingSink {
    async fn write_batch(&self, _index: &str, records: Vec<Record>) -> Result<usize, SinkError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            *attempts += 1;
        }
        Err(SinkError::Rejected {
            failed: records.len(),
            total: records.len(),
            reason: "index is read-only".to_owned(),
        })
    }
}

/// Store evaluating queries over records held in memory, newest first.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Vec<Record>,
    unavailable: bool,
}

impl MemoryStore {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            unavailable: false,
        }
    }

    /// A store that fails every request.
    pub fn unavailable() -> Self {
        Self {
            records: Vec::new(),
            unavailable: true,
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        match self.unavailable {
            true => Err(StoreError::Status {
                status: 503,
                body: "no shard available".to_owned(),
            }),
            false => Ok(()),
        }
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn count(&self, _index: &str, query: &LogQuery) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.records.iter().filter(|r| query.matches(r)).count() as u64)
    }

    async fn search(
        &self,
        _index: &str,
        query: &LogQuery,
        page: Page,
    ) -> Result<SearchResults, StoreError> {
        self.check()?;
        let mut matching: Vec<(usize, &Record)> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| query.matches(r))
            .collect();
        matching.sort_by(|(_, a), (_, b)| b.timestamp.cmp(&a.timestamp));

        let total = matching.len() as u64;
        let records = matching
            .into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.size() as usize)
            .map(|(position, record)| StoredRecord {
                id: format!("record-{position}"),
                source: record.clone(),
            })
            .collect();

        Ok(SearchResults { total, records })
    }
}
