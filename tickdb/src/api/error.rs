//! HTTP error responses.
//!
//! Every failure renders as `{"error": <title>, "reason": <message>}` with a
//! matching status code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::database_registry::RegistryError;
use crate::query::{QueryError, QueryParseError};
use crate::storage::DatabaseError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    reason: &'a str,
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    const fn title(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "Bad Request",
            Self::NotFound(_) => "Not Found",
            Self::Conflict(_) => "Conflict",
            Self::Internal(_) => "Server Error",
        }
    }

    fn reason(&self) -> &str {
        match self {
            Self::BadRequest(reason)
            | Self::NotFound(reason)
            | Self::Conflict(reason)
            | Self::Internal(reason) => reason,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title(), self.reason())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Internal(_)) {
            tracing::error!("request failed: {}", self.reason());
        } else {
            tracing::debug!("request rejected: {self}");
        }

        let body = ErrorBody {
            error: self.title(),
            reason: self.reason(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::AlreadyExists(_) => Self::Conflict(e.to_string()),
            RegistryError::NotFound(_) => Self::NotFound(e.to_string()),
            RegistryError::InvalidName(_) => Self::BadRequest(e.to_string()),
            RegistryError::Database(e) => e.into(),
            RegistryError::Io(_) | RegistryError::LockPoisoned => Self::Internal(e.to_string()),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Codec(_) | DatabaseError::InvalidBucketCount => {
                Self::BadRequest(e.to_string())
            }
            _ => Self::Internal(e.to_string()),
        }
    }
}

impl From<QueryParseError> for ApiError {
    fn from(e: QueryParseError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Parse(e) => e.into(),
            QueryError::Database(e) => e.into(),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::BadRequest(format!("invalid JSON body: {e}"))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("storage task failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_registry::NameValidationError;

    #[test]
    fn test_registry_error_mapping() {
        assert_eq!(
            ApiError::from(RegistryError::AlreadyExists("a".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(RegistryError::NotFound("a".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(RegistryError::InvalidName(NameValidationError::Empty)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(RegistryError::LockPoisoned).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_query_error_mapping() {
        let parse = QueryError::Parse(QueryParseError::InvalidGroup("x".into()));
        assert_eq!(ApiError::from(parse).status(), StatusCode::BAD_REQUEST);

        let buckets = QueryError::Database(DatabaseError::InvalidBucketCount);
        assert_eq!(ApiError::from(buckets).status(), StatusCode::BAD_REQUEST);

        let poisoned = QueryError::Database(DatabaseError::LockPoisoned);
        assert_eq!(
            ApiError::from(poisoned).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
