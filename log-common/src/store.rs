use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::query::{LogQuery, Page};
use crate::record::Record;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid store url {url}: {error}")]
    InvalidUrl { url: String, error: url::ParseError },
    #[error("failed to build http client: {0}")]
    Client(reqwest::Error),
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("store responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode store response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Read access to stored records, as used by the query endpoints.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn count(&self, index: &str, query: &LogQuery) -> Result<u64, StoreError>;

    async fn search(
        &self,
        index: &str,
        query: &LogQuery,
        page: Page,
    ) -> Result<SearchResults, StoreError>;
}

/// A stored record and the identifier the store assigned to it.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct StoredRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source")]
    pub source: Record,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SearchResults {
    pub total: u64,
    pub records: Vec<StoredRecord>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    total: HitsTotal,
    hits: Vec<StoredRecord>,
}

#[derive(Debug, Deserialize)]
struct HitsTotal {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// Response to a bulk write. `errors` is set as soon as one item failed.
#[derive(Debug, Deserialize)]
pub struct BulkResponse {
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
pub struct BulkItem {
    pub status: u16,
    pub error: Option<Value>,
}

impl BulkResponse {
    /// Items the store refused, in submission order.
    pub fn failed_items(&self) -> impl Iterator<Item = &BulkItem> {
        self.items
            .iter()
            .flat_map(HashMap::values)
            .filter(|item| item.error.is_some() || item.status >= 300)
    }
}

impl BulkItem {
    /// Human readable reason for a failed item, if the store gave one.
    pub fn reason(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        match error.get("reason").and_then(Value::as_str) {
            Some(reason) => Some(reason.to_owned()),
            None => Some(error.to_string()),
        }
    }
}

/// HTTP client for an Elasticsearch-compatible search store.
///
/// The inner `reqwest::Client` pools connections and is shared by all the
/// batch workers and query handlers.
#[derive(Clone)]
pub struct ElasticClient {
    client: reqwest::Client,
    base_url: Url,
}

impl ElasticClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        // Url::join drops the last path segment unless the base ends with a slash
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|error| StoreError::InvalidUrl {
            url: base_url.to_owned(),
            error,
        })?;

        let client = reqwest::Client::builder()
            .user_agent("log-ingestor")
            .timeout(timeout)
            .build()
            .map_err(StoreError::Client)?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        self.base_url
            .join(path)
            .map_err(|error| StoreError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                error,
            })
    }

    /// Check that the store is reachable, used once at startup.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let response = self.client.get(self.base_url.clone()).send().await?;
        check_status(response).await.map(drop)
    }

    /// Submit an NDJSON bulk payload in a single request.
    pub async fn bulk(&self, payload: String, refresh: bool) -> Result<BulkResponse, StoreError> {
        let mut url = self.url("_bulk")?;
        if refresh {
            url.query_pairs_mut().append_pair("refresh", "true");
        }

        let response = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .await?;

        decode(response).await
    }

    async fn post_json<T>(&self, path: &str, body: &Value) -> Result<T, StoreError>
    where
        T: DeserializeOwned,
    {
        let response = self.client.post(self.url(path)?).json(body).send().await?;
        decode(response).await
    }
}

#[async_trait]
impl LogStore for ElasticClient {
    async fn count(&self, index: &str, query: &LogQuery) -> Result<u64, StoreError> {
        let response: CountResponse = self
            .post_json(&format!("{index}/_count"), &query.count_body())
            .await?;
        Ok(response.count)
    }

    async fn search(
        &self,
        index: &str,
        query: &LogQuery,
        page: Page,
    ) -> Result<SearchResults, StoreError> {
        let response: SearchResponse = self
            .post_json(&format!("{index}/_search"), &query.search_body(page))
            .await?;
        Ok(SearchResults {
            total: response.hits.total.value,
            records: response.hits.hits,
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StoreError> {
    let body = check_status(response).await?.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}
