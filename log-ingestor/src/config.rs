use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3000")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "auth,database,email,payment,server,services")]
    pub kafka_topics: TopicList,

    #[envconfig(default = "http://localhost:9200")]
    pub elasticsearch_url: String,

    #[envconfig(default = "ingestor")]
    pub elasticsearch_index: String,

    // Make written records visible to searches as soon as the bulk call returns
    #[envconfig(default = "true")]
    pub elasticsearch_refresh: bool,

    #[envconfig(default = "10000")]
    pub elasticsearch_timeout_ms: EnvMsDuration,

    #[envconfig(default = "5000")]
    pub queue_capacity: NonZeroUsize,

    #[envconfig(default = "10")]
    pub batch_size: NonZeroUsize,

    #[envconfig(default = "5000")]
    pub batch_timeout_ms: EnvMsDuration,

    #[envconfig(default = "20")]
    pub worker_count: NonZeroUsize,

    #[envconfig(default = "30000")]
    pub fetch_retry_max_interval_ms: EnvMsDuration,

    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "ingestor-group")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Interval between commits of the offsets stored after each hand-off
    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: u32,

    #[envconfig(default = "10000000")]
    pub kafka_consumer_fetch_max_bytes: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// Comma-separated, non-empty list of topics to consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicList(pub Vec<String>);

#[derive(Debug, PartialEq, Eq)]
pub struct TopicListIsEmptyError;

impl FromStr for TopicList {
    type Err = TopicListIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut topics: Vec<String> = Vec::new();
        for topic in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if !topics.iter().any(|known| known == topic) {
                topics.push(topic.to_owned());
            }
        }

        if topics.is_empty() {
            Err(TopicListIsEmptyError)
        } else {
            Ok(TopicList(topics))
        }
    }
}
