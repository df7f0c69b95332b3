pub const MESSAGES_RECEIVED: &str = "ingestor_source_messages_received";
pub const RECORDS_ENQUEUED: &str = "ingestor_records_enqueued";
pub const DECODE_FAILURES: &str = "ingestor_source_decode_failures";
pub const FETCH_FAILURES: &str = "ingestor_source_fetch_failures";
pub const COMMIT_FAILURES: &str = "ingestor_source_commit_failures";
pub const QUEUE_DEPTH: &str = "ingestor_queue_depth";
pub const BATCHES_FLUSHED: &str = "ingestor_batches_flushed";
pub const RECORDS_FLUSHED: &str = "ingestor_records_flushed";
pub const BATCHES_FAILED: &str = "ingestor_batches_failed";
pub const RECORDS_DROPPED: &str = "ingestor_records_dropped";
pub const BATCH_SIZE: &str = "ingestor_batch_size";
pub const FLUSH_DURATION: &str = "ingestor_flush_duration_seconds";
pub const HTTP_RECORDS_RECEIVED: &str = "ingestor_http_records_received";
pub const KAFKA_CALLBACK_QUEUE_DEPTH: &str = "ingestor_kafka_callback_queue_depth";
pub const KAFKA_CONSUMER_LAG: &str = "ingestor_kafka_consumer_lag";
