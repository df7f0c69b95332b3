use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// A single log event, as produced by services on the log topics and as
/// stored in the search index.
///
/// Only the structure is checked when decoding: every field but `timestamp`
/// falls back to an empty value, and the timestamp is taken as-is from the
/// producer (no clock skew correction).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub resource_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub span_id: String,
    #[serde(default)]
    pub commit: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub topic: String,
}

impl Record {
    /// Decode a record from a raw stream payload and label it with the topic
    /// it was read from. Any `topic` present in the payload is discarded.
    pub fn decode(payload: &[u8], topic: &str) -> Result<Record, serde_json::Error> {
        let mut record: Record = serde_json::from_slice(payload)?;
        record.topic = topic.to_owned();
        Ok(record)
    }
}

// Producers serialize an unset metadata map as `null`.
fn null_as_empty<'de, D>(deserializer: D) -> Result<HashMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<HashMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}
