use std::num::NonZeroU32;

use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::record::Record;

/// Keyword value that disables a filter, as sent by the dashboard selects.
const UNFILTERED: &str = "all";

pub const DEFAULT_PAGE_SIZE: NonZeroU32 = match NonZeroU32::new(20) {
    Some(size) => size,
    None => NonZeroU32::MIN,
};

/// A single condition on stored records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    Level(String),
    Topic(String),
    /// Inclusive lower bound on the record timestamp
    Since(OffsetDateTime),
    /// Inclusive upper bound on the record timestamp
    Until(OffsetDateTime),
}

impl Predicate {
    fn to_clause(&self) -> Value {
        match self {
            Predicate::Level(level) => json!({ "match": { "level": level } }),
            Predicate::Topic(topic) => json!({ "match": { "topic": topic } }),
            Predicate::Since(at) => json!({ "range": { "timestamp": { "gte": rfc3339(at) } } }),
            Predicate::Until(at) => json!({ "range": { "timestamp": { "lte": rfc3339(at) } } }),
        }
    }

    /// Keyword predicates compare case-insensitively, like the analyzed
    /// `match` queries the store runs for them.
    fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::Level(level) => record.level.eq_ignore_ascii_case(level),
            Predicate::Topic(topic) => record.topic.eq_ignore_ascii_case(topic),
            Predicate::Since(at) => record.timestamp >= *at,
            Predicate::Until(at) => record.timestamp <= *at,
        }
    }
}

/// Typed filter over stored records: a list of predicates that must all hold.
///
/// ```
/// use log_common::query::{LogQuery, Predicate};
///
/// let query = LogQuery::new().level("error").topic("all");
/// assert_eq!(query.predicates(), &[Predicate::Level("error".to_string())]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogQuery {
    predicates: Vec<Predicate>,
}

impl LogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on the severity level. Empty or `"all"` leaves the query unfiltered.
    pub fn level(self, level: &str) -> Self {
        self.keyword(level, Predicate::Level)
    }

    /// Filter on the origin topic. Empty or `"all"` leaves the query unfiltered.
    pub fn topic(self, topic: &str) -> Self {
        self.keyword(topic, Predicate::Topic)
    }

    pub fn since(mut self, at: Option<OffsetDateTime>) -> Self {
        if let Some(at) = at {
            self.predicates.push(Predicate::Since(at));
        }
        self
    }

    pub fn until(mut self, at: Option<OffsetDateTime>) -> Self {
        if let Some(at) = at {
            self.predicates.push(Predicate::Until(at));
        }
        self
    }

    fn keyword(mut self, value: &str, predicate: fn(String) -> Predicate) -> Self {
        if !value.is_empty() && value != UNFILTERED {
            self.predicates.push(predicate(value.to_owned()));
        }
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Render as a store boolean query. An empty `must` list matches everything.
    pub fn to_filter(&self) -> Value {
        let must: Vec<Value> = self.predicates.iter().map(Predicate::to_clause).collect();
        json!({ "bool": { "must": must } })
    }

    /// Evaluate the query against a record held in memory.
    pub fn matches(&self, record: &Record) -> bool {
        self.predicates.iter().all(|predicate| predicate.matches(record))
    }

    pub fn count_body(&self) -> Value {
        json!({ "query": self.to_filter() })
    }

    /// Search request for one page of results, newest first.
    pub fn search_body(&self, page: Page) -> Value {
        json!({
            "from": page.offset(),
            "size": page.size(),
            "query": self.to_filter(),
            "sort": [{ "timestamp": { "order": "desc" } }],
            "track_total_hits": true,
        })
    }
}

/// One-based pagination window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    number: NonZeroU32,
    size: NonZeroU32,
}

impl Page {
    pub fn new(number: NonZeroU32, size: NonZeroU32) -> Self {
        Self { number, size }
    }

    /// Number of records before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.number.get() - 1) * u64::from(self.size.get())
    }

    pub fn size(&self) -> u32 {
        self.size.get()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            number: NonZeroU32::MIN,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

fn rfc3339(at: &OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}
