//! Time-series storage engine.
//!
//! A single-file, append-only store for numeric samples keyed by nanosecond
//! timestamps, indexed by a calendar-hierarchical tree whose interior pointers
//! cache rollup statistics.
//!
//! # File Format
//!
//! - Bytes 0-511: meta region holding one chunk (magic, version, root position)
//! - Bytes 512..: node chunks, appended and never rewritten
//!
//! Every chunk is `{length u32 BE, crc32 u32 BE, payload}`.
//!
//! # Usage
//!
//! ```ignore
//! use tickdb::storage::{Database, Granularity, Reducer};
//!
//! let db = Database::open(path)?;
//! db.put(ts, fields)?;
//! db.flush()?;
//!
//! let rows = db.query(from, to, Granularity::Minute, 5, &reducers)?;
//! ```

mod chunk;
mod codec;
mod cursor;
mod database;
mod level;
mod meta;
mod point;
mod rollup;
mod tree;

pub use chunk::{CHUNK_HEADER_SIZE, ChunkError, ChunkFile, META_REGION_SIZE};
pub use codec::{CodecError, Decoder, Encoder, MAX_PREFIXED_LEN};
pub use cursor::{Cursor, Entry};
pub use database::{Database, DatabaseError, Snapshot};
pub use level::{Granularity, Level, advance, exact_level, truncate, units_between};
pub use meta::{FORMAT_VERSION, MAGIC, Meta, MetaError};
pub use point::{Fields, Point};
pub use rollup::{ReducedValue, Reducer, Summary, UnknownReducer};
pub use tree::{Tree, TreeError};
