use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use log_common::health::HealthRegistry;
use log_ingestor::pipeline::Pipeline;
use log_ingestor::queue::RecordQueue;
use log_ingestor::source::SourceAdapter;
use log_ingestor::test_utils::{payload, record, MemorySink, ScriptedStream};
use log_ingestor::worker::BatchPolicy;

const BATCH_SIZE: usize = 10;

fn policy() -> BatchPolicy {
    BatchPolicy {
        max_size: NonZeroUsize::new(BATCH_SIZE).unwrap(),
        max_age: Duration::from_secs(5),
    }
}

fn pipeline(capacity: usize, sink: &MemorySink, liveness: &HealthRegistry) -> Pipeline {
    let queue = Arc::new(RecordQueue::new(NonZeroUsize::new(capacity).unwrap()));
    let mut pipeline = Pipeline::new(queue);
    pipeline.spawn_workers(
        NonZeroUsize::new(3).unwrap(),
        "ingestor",
        Arc::new(sink.clone()),
        policy(),
        liveness,
        Duration::from_secs(60),
    );
    pipeline
}

fn scripted(count: usize) -> ScriptedStream {
    (0..count).fold(ScriptedStream::new(), |stream, i| {
        stream.message(payload("info", &format!("message {i}")))
    })
}

#[tokio::test(start_paused = true)]
async fn drains_every_record_from_sources() {
    let sink = MemorySink::default();
    let liveness = HealthRegistry::new("liveness");
    let mut pipeline = pipeline(100, &sink, &liveness);

    for topic in ["auth", "payment"] {
        let stream = scripted(3 * BATCH_SIZE);
        let source = SourceAdapter::new(
            topic,
            stream,
            pipeline.queue(),
            liveness.register(format!("kafka_source_{topic}"), Duration::from_secs(30)),
        );
        pipeline.spawn_source(source);
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(liveness.get_status().healthy);

    pipeline.shutdown().await;

    let batches = sink.batches();
    assert_eq!(sink.len(), 6 * BATCH_SIZE);
    assert!(batches.iter().all(|batch| !batch.is_empty()));
    assert!(batches.iter().all(|batch| batch.len() <= BATCH_SIZE));

    let auth = batches
        .iter()
        .flatten()
        .filter(|record| record.topic == "auth")
        .count();
    assert_eq!(auth, 3 * BATCH_SIZE);
}

#[tokio::test(start_paused = true)]
async fn shutdown_mid_stream_flushes_what_was_enqueued() {
    let sink = MemorySink::slow(Duration::from_secs(1));
    let liveness = HealthRegistry::new("liveness");
    let queue = Arc::new(RecordQueue::new(NonZeroUsize::new(5).unwrap()));
    let mut pipeline = Pipeline::new(queue.clone());

    // Records from another producer, buffered ahead of the topic
    for i in 0..3 {
        queue
            .enqueue(record("email", "warn", &format!("direct {i}")))
            .await
            .unwrap();
    }

    pipeline.spawn_workers(
        NonZeroUsize::MIN,
        "ingestor",
        Arc::new(sink.clone()),
        policy(),
        &liveness,
        Duration::from_secs(60),
    );
    let stream = scripted(3 * BATCH_SIZE);
    let commits = stream.commits();
    pipeline.spawn_source(SourceAdapter::new(
        "auth",
        stream,
        pipeline.queue(),
        liveness.register("kafka_source_auth", Duration::from_secs(30)),
    ));

    // The worker is stuck writing its first batch and the source waits on a full queue
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(queue.len(), 5);
    let consumed = commits.offsets().len();
    assert!(consumed > 0 && consumed < 3 * BATCH_SIZE, "{consumed}");

    pipeline.shutdown().await;

    assert!(queue.is_closed());
    assert!(queue.is_empty());
    // Nothing is consumed once shutdown starts, and nothing consumed is lost
    assert_eq!(commits.offsets().len(), consumed);
    assert_eq!(sink.len(), 3 + consumed);
    assert_eq!(sink.batch_sizes()[0], BATCH_SIZE);
}

#[tokio::test(start_paused = true)]
async fn full_batches_under_fast_arrival() {
    let sink = MemorySink::default();
    let liveness = HealthRegistry::new("liveness");
    let queue = Arc::new(RecordQueue::new(NonZeroUsize::new(100).unwrap()));
    let mut pipeline = Pipeline::new(queue.clone());

    for i in 0..3 * BATCH_SIZE {
        queue
            .enqueue(record("auth", "info", &format!("message {i}")))
            .await
            .unwrap();
    }
    pipeline.spawn_workers(
        NonZeroUsize::MIN,
        "ingestor",
        Arc::new(sink.clone()),
        policy(),
        &liveness,
        Duration::from_secs(60),
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sink.batch_sizes(), vec![BATCH_SIZE; 3]);

    pipeline.shutdown().await;
    assert_eq!(sink.batch_sizes(), vec![BATCH_SIZE; 3]);
}

#[tokio::test(start_paused = true)]
async fn duplicate_deliveries_are_flushed_twice() {
    let sink = MemorySink::default();
    let liveness = HealthRegistry::new("liveness");
    let mut pipeline = pipeline(10, &sink, &liveness);

    let stream = ScriptedStream::new()
        .message(payload("error", "redelivered"))
        .message(payload("error", "redelivered"));
    pipeline.spawn_source(SourceAdapter::new(
        "database",
        stream,
        pipeline.queue(),
        liveness.register("kafka_source_database", Duration::from_secs(30)),
    ));

    tokio::time::sleep(Duration::from_millis(10)).await;
    pipeline.shutdown().await;

    let records: Vec<_> = sink.batches().into_iter().flatten().collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], records[1]);
}
