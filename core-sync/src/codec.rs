//! Storage encodings shared by the SQLite stores.

use crate::{EngineError, Result};
use chrono::{DateTime, NaiveDate, Utc};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(field: &str, millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| EngineError::invalid(field, millis.to_string()))
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| EngineError::invalid(field, value))
}
