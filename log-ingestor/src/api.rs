use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log_common::store::{SearchResults, StoreError, StoredRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Success,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngestResponse {
    pub status: IngestStatus,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct ListResponse {
    pub logs: Vec<StoredRecord>,
    pub total: u64,
}

impl From<SearchResults> for ListResponse {
    fn from(results: SearchResults) -> Self {
        Self {
            logs: results.records,
            total: results.total,
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),
    #[error("Invalid {0} value")]
    InvalidParameter(&'static str),
    #[error("Ingestion is shutting down")]
    ShuttingDown,
    #[error("Internal Server Error")]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidBody(_) | ApiError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            ApiError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(e) => {
                error!("store request failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
