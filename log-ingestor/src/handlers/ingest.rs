use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use log_common::record::Record;
use metrics::counter;
use tracing::instrument;

use crate::api::{ApiError, IngestResponse, IngestStatus};
use crate::metrics_consts::{HTTP_RECORDS_RECEIVED, RECORDS_ENQUEUED};
use crate::router;

/// Accept a single record and hand it to the batch workers. Waits for room
/// in the queue like the stream sources do. The topic is kept as sent.
#[instrument(skip_all, fields(topic))]
pub async fn add_log(
    State(state): State<router::State>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let record: Record = serde_json::from_slice(&body)?;
    tracing::Span::current().record("topic", record.topic.as_str());
    counter!(HTTP_RECORDS_RECEIVED).increment(1);

    state
        .queue
        .enqueue(record)
        .await
        .map_err(|_| ApiError::ShuttingDown)?;
    counter!(RECORDS_ENQUEUED, "source" => "http").increment(1);

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            status: IngestStatus::Success,
        }),
    ))
}
