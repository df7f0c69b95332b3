use std::num::NonZeroU32;

use axum::extract::{Query, State};
use axum::Json;
use log_common::query::{LogQuery, Page, DEFAULT_PAGE_SIZE};
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::macros::{format_description, time};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use tracing::instrument;

use crate::api::{ApiError, CountResponse, ListResponse};
use crate::router;

/// Query string shared by the count and list routes. Values are kept as
/// strings so that a bad one maps to a named `Invalid <name> value` error.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogParams {
    pub page: Option<String>,
    pub size: Option<String>,
    pub log_level: Option<String>,
    pub topic: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl LogParams {
    pub fn query(&self) -> Result<LogQuery, ApiError> {
        Ok(LogQuery::new()
            .level(self.log_level.as_deref().unwrap_or_default())
            .topic(self.topic.as_deref().unwrap_or_default())
            .since(parse_date(self.start_date.as_deref(), "startDate", Time::MIDNIGHT)?)
            .until(parse_date(
                self.end_date.as_deref(),
                "endDate",
                time!(23:59:59.999999999),
            )?))
    }

    pub fn page(&self) -> Result<Page, ApiError> {
        let number = parse_positive(self.page.as_deref(), "page", NonZeroU32::MIN)?;
        let size = parse_positive(self.size.as_deref(), "size", DEFAULT_PAGE_SIZE)?;
        Ok(Page::new(number, size))
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_positive(
    value: Option<&str>,
    name: &'static str,
    default: NonZeroU32,
) -> Result<NonZeroU32, ApiError> {
    match present(value) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ApiError::InvalidParameter(name)),
    }
}

/// Accepts a full RFC 3339 timestamp, or a plain `YYYY-MM-DD` date taken at
/// `time_of_day` in UTC.
fn parse_date(
    value: Option<&str>,
    name: &'static str,
    time_of_day: Time,
) -> Result<Option<OffsetDateTime>, ApiError> {
    let Some(value) = present(value) else {
        return Ok(None);
    };

    if let Ok(at) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(Some(at));
    }

    let date = Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map_err(|_| ApiError::InvalidParameter(name))?;
    Ok(Some(PrimitiveDateTime::new(date, time_of_day).assume_utc()))
}

#[instrument(skip_all)]
pub async fn count_logs(
    State(state): State<router::State>,
    Query(params): Query<LogParams>,
) -> Result<Json<CountResponse>, ApiError> {
    let query = params.query()?;
    let count = state.store.count(&state.index, &query).await?;

    Ok(Json(CountResponse { count }))
}

#[instrument(skip_all)]
pub async fn list_logs(
    State(state): State<router::State>,
    Query(params): Query<LogParams>,
) -> Result<Json<ListResponse>, ApiError> {
    let page = params.page()?;
    let query = params.query()?;
    let results = state.store.search(&state.index, &query, page).await?;

    Ok(Json(results.into()))
}
