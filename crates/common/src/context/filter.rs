//! Query filter fragments and their combination
//!
//! Filters are opaque predicate documents understood by the index service.
//! This module only merges them and builds the two fragment shapes the
//! chat surface produces (creation-date range, single document).

use crate::errors::{AppError, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key holding the parent document id
pub const DOC_ID_KEY: &str = "doc_id";

/// Metadata key holding the document creation time as Unix seconds
pub const CREATED_AT_UNIX_KEY: &str = "file_created_at_unix";

/// A merged metadata filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryFilter(Map<String, Value>);

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge fragments in order. Absent and empty fragments are skipped;
    /// a later fragment overwrites keys set by an earlier one.
    pub fn combine<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = Option<QueryFilter>>,
    {
        fragments
            .into_iter()
            .flatten()
            .fold(Self::new(), |mut merged, fragment| {
                merged.0.extend(fragment.0);
                merged
            })
    }

    /// Fragment restricting results to one document
    pub fn for_document(doc_id: impl Into<String>) -> Self {
        let mut filter = Self::new();
        filter.insert(DOC_ID_KEY, Value::String(doc_id.into()));
        filter
    }

    /// Fragment restricting document creation time to `[start, end]`
    pub fn created_between<Tz: TimeZone>(start: &DateTime<Tz>, end: &DateTime<Tz>) -> Self {
        let mut range = Map::new();
        range.insert("$gte".to_string(), start.timestamp().into());
        range.insert("$lte".to_string(), end.timestamp().into());

        let mut filter = Self::new();
        filter.insert(CREATED_AT_UNIX_KEY, Value::Object(range));
        filter
    }

    /// Fragment covering whole calendar days in the given UTC offset,
    /// from the start of `start` to the last second of `end`.
    pub fn for_dates(start: NaiveDate, end: NaiveDate, utc_offset_hours: i32) -> Result<Self> {
        if end < start {
            return Err(AppError::Validation {
                message: format!("date range ends ({}) before it starts ({})", end, start),
                field: Some("date_range".to_string()),
            });
        }

        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            AppError::Configuration {
                message: format!("invalid UTC offset: {} hours", utc_offset_hours),
            }
        })?;

        let local = |date: NaiveDate, (h, m, s): (u32, u32, u32)| {
            date.and_hms_opt(h, m, s)
                .and_then(|naive| naive.and_local_timezone(offset).single())
                .ok_or_else(|| AppError::InvalidFormat {
                    message: format!("cannot place {} in UTC{:+}", date, utc_offset_hours),
                })
        };

        let from = local(start, (0, 0, 0))?;
        let to = local(end, (23, 59, 59))?;
        Ok(Self::created_between(&from, &to))
    }

    /// Document id carried by this filter, as a plain value or `{"$eq": ..}`
    pub fn doc_id(&self) -> Option<&str> {
        match self.0.get(DOC_ID_KEY)? {
            Value::String(id) => Some(id.as_str()),
            Value::Object(ops) => ops.get("$eq").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Copy of this filter with the document predicate replaced
    pub fn scoped_to_document(&self, doc_id: &str) -> Self {
        let mut scoped = self.clone();
        scoped.insert(DOC_ID_KEY, Value::String(doc_id.to_string()));
        scoped
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for QueryFilter {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
