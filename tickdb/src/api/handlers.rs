//! Request handlers.
//!
//! Storage calls block on file I/O, so each handler moves its work onto the
//! blocking thread pool.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AppState;
use super::error::ApiError;
use crate::database_registry::DatabaseRegistry;
use crate::query::{QueryExecutor, QueryRequest, QueryRow, TimeValue, parse_time};
use crate::storage::Fields;

/// One sample in a store request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostData {
    pub time: TimeValue,
    pub value: Fields,
}

/// Body of a range delete request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRange {
    pub from: TimeValue,
    pub to: TimeValue,
}

/// Run `f` against the registry on the blocking thread pool.
async fn blocking<T, F>(registry: Arc<DatabaseRegistry>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&DatabaseRegistry) -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&registry)).await?
}

pub async fn server_info() -> impl IntoResponse {
    Json(json!({
        "tickdb": "Welcome",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn list_databases(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, ApiError> {
    let names = blocking(state.registry, |registry| Ok(registry.list()?)).await?;
    Ok(Json(names))
}

pub async fn create_database(
    State(state): State<AppState>,
    Path(db): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(state.registry, move |registry| {
        registry.create(&db)?;
        Ok(())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(json!({"ok": true}))))
}

pub async fn database_info(
    State(state): State<AppState>,
    Path(db): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let name = blocking(state.registry, move |registry| {
        registry.get(&db)?;
        Ok(db)
    })
    .await?;
    Ok(Json(json!({"name": name})))
}

pub async fn delete_database(
    State(state): State<AppState>,
    Path(db): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(state.registry, move |registry| Ok(registry.delete(&db)?)).await?;
    Ok(Json(json!({"ok": true})))
}

/// Store a batch of samples and flush them.
pub async fn store_points(
    State(state): State<AppState>,
    Path(db): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let data: Vec<PostData> = serde_json::from_slice(&body)?;
    let points = data
        .into_iter()
        .map(|item| Ok((item.time.resolve()?, item.value)))
        .collect::<Result<Vec<_>, ApiError>>()?;

    let stored = blocking(state.registry, move |registry| {
        let database = registry.get(&db)?;
        let stored = points.len();
        for (timestamp, fields) in points {
            database.put(timestamp, fields)?;
        }
        database.flush()?;
        Ok(stored)
    })
    .await?;

    Ok(Json(json!({"ok": true, "stored": stored})))
}

pub async fn run_query(
    State(state): State<AppState>,
    Path(db): Path<String>,
    body: Bytes,
) -> Result<Json<Vec<QueryRow>>, ApiError> {
    let request: QueryRequest = serde_json::from_slice(&body)?;
    let rows = blocking(state.registry, move |registry| {
        let database = registry.get(&db)?;
        Ok(QueryExecutor::new(&database).execute(&request)?)
    })
    .await?;
    Ok(Json(rows))
}

/// Delete `[from, to)` and flush.
pub async fn delete_range(
    State(state): State<AppState>,
    Path(db): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let range: DeleteRange = serde_json::from_slice(&body)?;
    let from = range.from.resolve()?;
    let to = range.to.resolve()?;

    blocking(state.registry, move |registry| {
        let database = registry.get(&db)?;
        database.delete(from, to)?;
        database.flush()?;
        Ok(())
    })
    .await?;

    Ok(Json(json!({"ok": true})))
}

/// Fields stored at exactly `time`.
pub async fn get_point(
    State(state): State<AppState>,
    Path((db, time)): Path<(String, String)>,
) -> Result<Json<QueryRow>, ApiError> {
    let timestamp = parse_time(&time)?;
    let fields = blocking(state.registry, move |registry| {
        let database = registry.get(&db)?;
        Ok(database.get(timestamp)?)
    })
    .await?;

    fields
        .map(|fields| Json(QueryRow { timestamp, fields }))
        .ok_or_else(|| ApiError::NotFound(format!("no point at {time}")))
}
