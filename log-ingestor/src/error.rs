use log_common::store::StoreError;
use metrics_exporter_prometheus::BuildError;
use rdkafka::error::KafkaError;
use thiserror::Error;

/// Startup failures. Any of these aborts the process before the pipeline runs.
#[derive(Error, Debug)]
pub enum IngestorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] envconfig::Error),
    #[error("search store is not usable: {0}")]
    Store(#[from] StoreError),
    #[error("failed to create consumer for topic {topic}: {error}")]
    Consumer { topic: String, error: KafkaError },
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] BuildError),
    #[error("http server failed: {0}")]
    Io(#[from] std::io::Error),
}
