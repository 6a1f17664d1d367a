//! HTTP interface.
//!
//! | Method | Path             | Action                                 |
//! |--------|------------------|----------------------------------------|
//! | GET    | `/`              | server info                            |
//! | GET    | `/_all_dbs`      | list databases                         |
//! | PUT    | `/{db}`          | create a database                      |
//! | GET    | `/{db}`          | database info                          |
//! | DELETE | `/{db}`          | remove a database                      |
//! | POST   | `/{db}`          | store `[{"time", "value"}]` and flush  |
//! | POST   | `/{db}/_query`   | aggregation query                      |
//! | POST   | `/{db}/_delete`  | delete `{"from", "to"}` and flush      |
//! | GET    | `/{db}/{time}`   | point at an exact time                 |

mod error;
mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::database_registry::DatabaseRegistry;

pub use error::ApiError;
pub use handlers::{DeleteRange, PostData};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DatabaseRegistry>,
}

/// Build the router over `registry`.
pub fn router(registry: Arc<DatabaseRegistry>) -> Router {
    Router::new()
        .route("/", get(handlers::server_info))
        .route("/_all_dbs", get(handlers::list_databases))
        .route(
            "/{db}",
            get(handlers::database_info)
                .put(handlers::create_database)
                .delete(handlers::delete_database)
                .post(handlers::store_points),
        )
        .route("/{db}/_query", post(handlers::run_query))
        .route("/{db}/_delete", post(handlers::delete_range))
        .route("/{db}/{time}", get(handlers::get_point))
        .with_state(AppState { registry })
}
