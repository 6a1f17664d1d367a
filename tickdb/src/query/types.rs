//! Request and response types for aggregation queries.
//!
//! ```json
//! {
//!     "from": "2016-05-31T08:00:00Z",
//!     "to": "2016-05-31T18:00:59Z",
//!     "group": "5minutes",
//!     "fields": {
//!         "open": {"reducer": "first"},
//!         "close": {"reducer": "last"}
//!     }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::query::parse::{QueryParseError, parse_time};
use crate::storage::{Fields, Reducer};

/// A timestamp as sent by clients: RFC 3339 text or integer nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Nanos(i64),
    Text(String),
}

impl TimeValue {
    /// Resolve to nanoseconds since the Unix epoch.
    pub fn resolve(&self) -> Result<i64, QueryParseError> {
        match self {
            Self::Nanos(ns) => Ok(*ns),
            Self::Text(text) => parse_time(text),
        }
    }
}

impl From<&str> for TimeValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Reducer selection for one output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub reducer: Reducer,
}

/// An aggregation query over `[from, to)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub from: TimeValue,
    pub to: TimeValue,
    /// Group size such as `"5minutes"` or `"day"`.
    #[serde(default = "default_group")]
    pub group: String,
    pub fields: BTreeMap<String, FieldSpec>,
}

fn default_group() -> String {
    "minute".to_string()
}

impl QueryRequest {
    /// Reducer per output field.
    #[must_use]
    pub fn reducers(&self) -> BTreeMap<String, Reducer> {
        self.fields
            .iter()
            .map(|(name, spec)| (name.clone(), spec.reducer))
            .collect()
    }
}

/// One output group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRow {
    /// Group start in nanoseconds.
    pub timestamp: i64,
    #[serde(flatten)]
    pub fields: Fields,
}
