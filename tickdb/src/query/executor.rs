//! Query execution.
//!
//! Resolves a [`QueryRequest`] into storage arguments and runs it against a
//! [`Database`].

use crate::query::parse::{QueryParseError, parse_group};
use crate::query::types::{QueryRequest, QueryRow};
use crate::storage::{Database, DatabaseError};

/// Runs aggregation queries against one database.
pub struct QueryExecutor<'a> {
    db: &'a Database,
}

impl<'a> QueryExecutor<'a> {
    #[must_use]
    pub const fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Parse and run `request`.
    pub fn execute(&self, request: &QueryRequest) -> Result<Vec<QueryRow>, QueryError> {
        let from = request.from.resolve()?;
        let to = request.to.resolve()?;
        let (granularity, bucket_count) = parse_group(&request.group)?;

        tracing::debug!(from, to, %granularity, bucket_count, "executing query");

        let rows = self
            .db
            .query(from, to, granularity, bucket_count, &request.reducers())?
            .into_iter()
            .map(|point| QueryRow {
                timestamp: point.timestamp,
                fields: point.fields,
            })
            .collect();
        Ok(rows)
    }
}

/// Errors that can occur during query execution.
#[derive(Debug)]
pub enum QueryError {
    /// The request could not be parsed.
    Parse(QueryParseError),
    /// Database error.
    Database(DatabaseError),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "{e}"),
            Self::Database(e) => write!(f, "database error: {e}"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            Self::Database(e) => Some(e),
        }
    }
}

impl From<QueryParseError> for QueryError {
    fn from(e: QueryParseError) -> Self {
        Self::Parse(e)
    }
}

impl From<DatabaseError> for QueryError {
    fn from(e: DatabaseError) -> Self {
        Self::Database(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::types::{FieldSpec, TimeValue};
    use crate::storage::{Fields, Reducer};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn prices() -> (tempfile::TempDir, Database) {
        let dir = tempdir().expect("create temp dir");
        let db = Database::open(&dir.path().join("prices.tick")).expect("open");
        for (minute, open, close) in [(0, 10.0, 11.0), (3, 12.0, 12.5), (6, 9.0, 8.0)] {
            let ts = 1_464_681_600_000_000_000 + minute * 60_000_000_000;
            db.put(
                ts,
                Fields::from([("open".to_string(), open), ("close".to_string(), close)]),
            )
            .expect("put");
        }
        (dir, db)
    }

    fn request(group: &str, fields: &[(&str, Reducer)]) -> QueryRequest {
        QueryRequest {
            from: TimeValue::from("2016-05-31T08:00:00Z"),
            to: TimeValue::from("2016-05-31T08:10:00Z"),
            group: group.to_string(),
            fields: fields
                .iter()
                .map(|(name, reducer)| ((*name).to_string(), FieldSpec { reducer: *reducer }))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_execute_first_and_last() {
        let (_dir, db) = prices();
        let rows = QueryExecutor::new(&db)
            .execute(&request(
                "5minutes",
                &[("open", Reducer::First), ("close", Reducer::Last)],
            ))
            .expect("execute");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, 1_464_681_600_000_000_000);
        assert!((rows[0].fields["open"] - 10.0).abs() < f64::EPSILON);
        assert!((rows[0].fields["close"] - 12.5).abs() < f64::EPSILON);
        assert_eq!(rows[1].timestamp, 1_464_681_900_000_000_000);
        assert!((rows[1].fields["open"] - 9.0).abs() < f64::EPSILON);
        assert!((rows[1].fields["close"] - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_execute_single_group() {
        let (_dir, db) = prices();
        let rows = QueryExecutor::new(&db)
            .execute(&request(
                "hour",
                &[("open", Reducer::Max), ("close", Reducer::Count)],
            ))
            .expect("execute");

        assert_eq!(rows.len(), 1);
        assert!((rows[0].fields["open"] - 12.0).abs() < f64::EPSILON);
        assert!((rows[0].fields["close"] - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_execute_bad_group() {
        let (_dir, db) = prices();
        let result = QueryExecutor::new(&db).execute(&request("5parsecs", &[]));
        assert!(matches!(
            result,
            Err(QueryError::Parse(QueryParseError::InvalidGroup(_)))
        ));
    }
}
