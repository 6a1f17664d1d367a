//! Request-level aggregation queries.
//!
//! Translates client requests (RFC 3339 times, group sizes such as
//! `"5minutes"`, per-field reducers) into [`Database::query`] calls.
//!
//! # Example
//!
//! ```ignore
//! use tickdb::query::{QueryExecutor, QueryRequest};
//!
//! let request: QueryRequest = serde_json::from_str(body)?;
//! let rows = QueryExecutor::new(&db).execute(&request)?;
//! ```
//!
//! [`Database::query`]: crate::storage::Database::query

mod executor;
mod parse;
mod types;

pub use executor::{QueryError, QueryExecutor};
pub use parse::{QueryParseError, parse_group, parse_time};
pub use types::{FieldSpec, QueryRequest, QueryRow, TimeValue};
