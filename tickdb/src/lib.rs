// Life of a request:
// 1. JSON comes in over HTTP
// 2. Resolve the database by name through the registry
// 3. For writes:
//     - Insert points into the time tree (one dirty branch per write)
//     - Flush the dirty branch and rewrite the meta page
//    For queries:
//     - Parse times and the group size
//     - Walk the tree with a cursor at the group granularity
//     - Merge bucket rollups into groups and apply reducers
//
// System components:
//  - Append-only chunk file with CRC-checked records
//  - Calendar-hierarchical tree with cached rollups
//  - Query layer and HTTP API

pub mod api;
pub mod config;
pub mod database_registry;
pub mod query;
pub mod storage;

pub use database_registry::DatabaseRegistry;
