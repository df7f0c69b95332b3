use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use log_common::health::HealthRegistry;
use log_common::metrics::{bind, serve};
use log_common::retry::RetryPolicy;
use log_common::store::ElasticClient;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use log_ingestor::config::Config;
use log_ingestor::error::IngestorError;
use log_ingestor::kafka::KafkaStream;
use log_ingestor::pipeline::Pipeline;
use log_ingestor::queue::RecordQueue;
use log_ingestor::router::{self, State};
use log_ingestor::sink::{ElasticsearchSink, PrintSink, RecordSink};
use log_ingestor::source::SourceAdapter;
use log_ingestor::worker::BatchPolicy;

// rdkafka reports statistics every 10 seconds
const SOURCE_LIVENESS_DEADLINE: Duration = Duration::from_secs(30);

fn setup_tracing() {
    let mut filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    if let Ok(directive) = "rdkafka=warn".parse() {
        filter = filter.add_directive(directive);
    }

    let log_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(log_layer).init();
}

async fn shutdown(mut term: Signal, mut interrupt: Signal) {
    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("shutting down gracefully...");
}

#[tokio::main]
async fn main() -> Result<(), IngestorError> {
    setup_tracing();
    info!("starting log ingestor...");

    let config = Config::init_from_env()?;
    let liveness = HealthRegistry::new("liveness");

    let store = ElasticClient::new(&config.elasticsearch_url, config.elasticsearch_timeout_ms.0)?;
    let sink: Arc<dyn RecordSink> = if config.print_sink {
        Arc::new(PrintSink {})
    } else {
        if let Err(e) = store.ping().await {
            error!("cannot reach store at {}: {}", config.elasticsearch_url, e);
            return Err(e.into());
        }
        Arc::new(ElasticsearchSink::new(store.clone(), config.elasticsearch_refresh))
    };

    let queue = Arc::new(RecordQueue::new(config.queue_capacity));
    let retry_policy =
        RetryPolicy::new(2, Duration::from_secs(1), config.fetch_retry_max_interval_ms.0);

    // Every consumer is created before anything starts, so that a bad topic
    // or broker address fails the process without leaving tasks behind
    let mut sources = Vec::with_capacity(config.kafka_topics.0.len());
    for topic in &config.kafka_topics.0 {
        let source_liveness =
            liveness.register(format!("kafka_source_{topic}"), SOURCE_LIVENESS_DEADLINE);
        let stream = KafkaStream::new(&config.kafka, topic, source_liveness.clone()).map_err(
            |error| IngestorError::Consumer {
                topic: topic.clone(),
                error,
            },
        )?;
        sources.push(
            SourceAdapter::new(topic.clone(), stream, queue.clone(), source_liveness)
                .with_retry_policy(retry_policy),
        );
    }

    // A taken port must fail startup before any record is consumed
    let listener = bind(&config.bind()).await?;

    let term = signal(SignalKind::terminate())?;
    let interrupt = signal(SignalKind::interrupt())?;

    let policy = BatchPolicy {
        max_size: config.batch_size,
        max_age: config.batch_timeout_ms.0,
    };
    // A worker can spend a full store timeout in a single flush
    let worker_deadline =
        policy.max_age + config.elasticsearch_timeout_ms.0 + Duration::from_secs(30);

    // Install the metrics recorder before anything reports to it
    let state = State {
        queue: queue.clone(),
        store: Arc::new(store),
        index: config.elasticsearch_index.clone(),
    };
    let app = router::router(state, liveness.clone(), config.export_prometheus)?;

    let mut pipeline = Pipeline::new(queue);
    pipeline.spawn_workers(
        config.worker_count,
        &config.elasticsearch_index,
        sink,
        policy,
        &liveness,
        worker_deadline,
    );
    for source in sources {
        info!(topic = source.topic(), "subscribed to topic");
        pipeline.spawn_source(source);
    }

    // The server stops on the first signal, then the pipeline drains
    let served = serve(app, listener, shutdown(term, interrupt)).await;
    if let Err(e) = &served {
        error!("http server failed: {}", e);
    }
    pipeline.shutdown().await;

    served?;
    info!("log ingestor stopped");
    Ok(())
}
