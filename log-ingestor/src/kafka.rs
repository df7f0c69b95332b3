use async_trait::async_trait;
use log_common::health::HealthHandle;
use metrics::gauge;
use rdkafka::consumer::{Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, ClientContext, Message, Statistics};
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::metrics_consts::{KAFKA_CALLBACK_QUEUE_DEPTH, KAFKA_CONSUMER_LAG};
use crate::source::{MessageStream, RawMessage, SourceError};

struct KafkaContext {
    liveness: HealthHandle,
}

impl ClientContext for KafkaContext {
    fn stats(&self, stats: Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy();

        gauge!(KAFKA_CALLBACK_QUEUE_DEPTH).set(stats.replyq as f64);

        for (topic, stats) in stats.topics {
            for (partition, stats) in stats.partitions {
                // Internal unassigned partition
                if partition < 0 {
                    continue;
                }
                gauge!(
                    KAFKA_CONSUMER_LAG,
                    "topic" => topic.clone(),
                    "partition" => partition.to_string()
                )
                .set(stats.consumer_lag as f64);
            }
        }
    }
}

impl ConsumerContext for KafkaContext {}

/// Consumer for a single topic, with offsets stored by hand after hand-off and
/// committed in the background by librdkafka.
pub struct KafkaStream {
    consumer: StreamConsumer<KafkaContext>,
    topic: String,
}

impl KafkaStream {
    pub fn new(
        config: &KafkaConfig,
        topic: &str,
        liveness: HealthHandle,
    ) -> Result<Self, KafkaError> {
        info!(
            topic,
            group = config.kafka_consumer_group,
            "connecting to Kafka brokers at {}...",
            config.kafka_hosts
        );

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &config.kafka_consumer_group)
            .set("auto.offset.reset", &config.kafka_consumer_offset_reset)
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                config.kafka_consumer_auto_commit_interval_ms.to_string(),
            )
            .set("enable.auto.offset.store", "false")
            .set(
                "fetch.max.bytes",
                config.kafka_consumer_fetch_max_bytes.to_string(),
            );

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let consumer: StreamConsumer<KafkaContext> =
            client_config.create_with_context(KafkaContext { liveness })?;
        consumer.subscribe(&[topic])?;

        Ok(Self {
            consumer,
            topic: topic.to_owned(),
        })
    }
}

#[async_trait]
impl MessageStream for KafkaStream {
    async fn fetch(&self) -> Result<RawMessage, SourceError> {
        let message = self.consumer.recv().await?;

        Ok(RawMessage {
            payload: message.payload().map(<[u8]>::to_vec),
            partition: message.partition(),
            offset: message.offset(),
        })
    }

    fn commit(&self, message: &RawMessage) -> Result<(), SourceError> {
        // The stored offset is the next one the group will read
        self.consumer
            .store_offset(&self.topic, message.partition, message.offset + 1)?;
        Ok(())
    }
}
