//! High-level database interface.
//!
//! A [`Database`] owns one store file, its meta page and the in-memory tree.
//! Writers (`put`, `delete`, `flush`) take the state lock exclusively; readers
//! (`get`, `query`, [`Database::snapshot`]) share it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::chunk::{ChunkError, ChunkFile};
use crate::storage::codec::{CodecError, MAX_PREFIXED_LEN};
use crate::storage::cursor::{Cursor, Entry};
use crate::storage::level::{Granularity, Level, advance, truncate, units_between};
use crate::storage::meta::{Meta, MetaError};
use crate::storage::point::{Fields, Point};
use crate::storage::rollup::{GroupTotals, REDUCED_VALUE_LEN, Reducer, Summary};
use crate::storage::tree::{Tree, TreeError, summary_encoded_len};

struct State {
    tree: Tree,
    meta: Meta,
}

/// A time-series store backed by a single append-only file.
pub struct Database {
    path: PathBuf,
    state: RwLock<State>,
}

impl Database {
    /// Open the store at `path`, creating it if the file is missing or empty.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let file = ChunkFile::open(path)?;

        let state = if file.is_new() {
            let tree = Tree::create(file)?;
            let meta = Meta {
                root_position: tree.root_position(),
                ..Meta::new()
            };
            let mut state = State { tree, meta };
            state.tree.file_mut().write_meta(&state.meta.encode())?;
            state.tree.file().sync()?;
            tracing::info!(path = %path.display(), "created database");
            state
        } else {
            let meta = Meta::decode(&file.read_chunk_at(0)?)?;
            let tree = Tree::open(file, meta.root_position)?;
            tracing::info!(
                path = %path.display(),
                root = meta.root_position,
                "opened database"
            );
            State { tree, meta }
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(state),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, DatabaseError> {
        self.state.read().map_err(|_| DatabaseError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, DatabaseError> {
        self.state.write().map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Store a point, replacing any point with the same timestamp.
    ///
    /// The change is visible to readers at once and durable after
    /// [`Database::flush`].
    pub fn put(&self, timestamp: i64, fields: Fields) -> Result<(), DatabaseError> {
        let point = Point::new(timestamp, fields);

        let len = point.encoded_len();
        if len > MAX_PREFIXED_LEN {
            return Err(CodecError::TooLong {
                len,
                max: MAX_PREFIXED_LEN,
            }
            .into());
        }

        let mut state = self.write()?;
        // Ancestor pointers carry a summary over the union of field names
        // below them, and every such union is part of the root summary.
        let summary = state.tree.summary();
        let added: usize = point
            .fields
            .keys()
            .filter(|name| !summary.contains_key(*name))
            .map(|name| 2 + name.len() + REDUCED_VALUE_LEN)
            .sum();
        let pointer_len = 16 + summary_encoded_len(summary) + added;
        if pointer_len > MAX_PREFIXED_LEN {
            return Err(CodecError::TooLong {
                len: pointer_len,
                max: MAX_PREFIXED_LEN,
            }
            .into());
        }

        state.tree.insert(point)?;
        Ok(())
    }

    /// Fields stored at exactly `timestamp`.
    pub fn get(&self, timestamp: i64) -> Result<Option<Fields>, DatabaseError> {
        let state = self.read()?;
        let mut cursor = Cursor::new(&state.tree, Level::Nanosecond);
        if !cursor.seek(timestamp)? {
            return Ok(None);
        }
        Ok(match cursor.current() {
            Some(Entry::Point(point)) if point.timestamp == timestamp => {
                Some(point.fields.clone())
            }
            _ => None,
        })
    }

    /// Remove every point with a timestamp in `[from, to)`.
    pub fn delete(&self, from: i64, to: i64) -> Result<(), DatabaseError> {
        if from >= to {
            return Ok(());
        }
        self.write()?.tree.delete(from, to)?;
        tracing::debug!(from, to, "deleted range");
        Ok(())
    }

    /// Aggregate `[from, to)` into groups of `bucket_count` consecutive
    /// `granularity` units.
    ///
    /// Groups are aligned to `from` truncated to `granularity` and labelled by
    /// their start. Only groups with at least one point are returned. Each
    /// reducer names an output field; fields absent from a group report `0.0`.
    pub fn query(
        &self,
        from: i64,
        to: i64,
        granularity: Granularity,
        bucket_count: u32,
        reducers: &BTreeMap<String, Reducer>,
    ) -> Result<Vec<Point>, DatabaseError> {
        if bucket_count == 0 {
            return Err(DatabaseError::InvalidBucketCount);
        }
        if from >= to {
            return Ok(Vec::new());
        }

        let origin = truncate(from, granularity.level());
        let state = self.read()?;
        let mut cursor = Cursor::new(&state.tree, granularity.level());

        let mut groups: Vec<(i64, GroupTotals)> = Vec::new();
        let mut current: Option<(i64, GroupTotals)> = None;
        let mut more = cursor.seek(origin)?;
        while more {
            let Some(entry) = cursor.current() else {
                break;
            };
            if entry.key() >= to {
                break;
            }

            let group = units_between(origin, entry.key(), granularity)
                .div_euclid(i64::from(bucket_count));
            let label = u32::try_from(group)
                .ok()
                .and_then(|group| group.checked_mul(bucket_count))
                .and_then(|units| advance(origin, granularity, units))
                .ok_or(DatabaseError::TimestampOutOfRange(entry.key()))?;

            match current.as_mut() {
                Some((start, totals)) if *start == label => totals.absorb(&entry.summary()),
                _ => {
                    groups.extend(current.take());
                    let mut totals = GroupTotals::new();
                    totals.absorb(&entry.summary());
                    current = Some((label, totals));
                }
            }
            more = cursor.next()?;
        }
        groups.extend(current);

        Ok(groups
            .into_iter()
            .map(|(label, totals)| Point::new(label, totals.reduce(reducers)))
            .collect())
    }

    /// Statistics over every stored point.
    pub fn summary(&self) -> Result<Summary, DatabaseError> {
        Ok(self.read()?.tree.summary().clone())
    }

    /// Write the dirty path and the meta page, then sync the file.
    pub fn flush(&self) -> Result<(), DatabaseError> {
        let mut state = self.write()?;
        if !state.tree.is_modified() {
            return Ok(());
        }

        let start = state.tree.file().position();
        let root_position = state.tree.flush()?;
        state.meta.root_position = root_position;
        let meta = state.meta.encode();
        state.tree.file_mut().write_meta(&meta)?;
        state.tree.file().sync()?;

        tracing::debug!(
            path = %self.path.display(),
            root = root_position,
            appended = state.tree.file().position() - start,
            "flushed database"
        );
        Ok(())
    }

    /// Flush and release the store.
    pub fn close(self) -> Result<(), DatabaseError> {
        self.flush()?;
        tracing::info!(path = %self.path.display(), "closed database");
        Ok(())
    }

    /// Hold a consistent read view for cursor traversal.
    pub fn snapshot(&self) -> Result<Snapshot<'_>, DatabaseError> {
        Ok(Snapshot { state: self.read()? })
    }
}

/// A read view that blocks writers while held.
pub struct Snapshot<'a> {
    state: RwLockReadGuard<'a, State>,
}

impl Snapshot<'_> {
    /// A cursor yielding entries at `level`.
    #[must_use]
    pub fn cursor(&self, level: Level) -> Cursor<'_> {
        Cursor::new(&self.state.tree, level)
    }

    #[must_use]
    pub fn summary(&self) -> &Summary {
        self.state.tree.summary()
    }
}

/// Errors that can occur during database operations.
#[derive(Debug)]
pub enum DatabaseError {
    /// File I/O or chunk integrity error.
    Chunk(ChunkError),
    /// The meta page is missing or invalid.
    Meta(MetaError),
    /// Tree operation failed.
    Tree(TreeError),
    /// A point cannot be encoded.
    Codec(CodecError),
    /// A query asked for zero units per group.
    InvalidBucketCount,
    /// A group label falls outside the representable range.
    TimestampOutOfRange(i64),
    /// A thread panicked while holding the state lock.
    LockPoisoned,
}

impl DatabaseError {
    /// Whether this error means the bytes on disk are damaged.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        match self {
            Self::Chunk(e) => e.is_corruption(),
            Self::Tree(e) => e.is_corruption(),
            Self::Meta(_) => true,
            Self::Codec(_)
            | Self::InvalidBucketCount
            | Self::TimestampOutOfRange(_)
            | Self::LockPoisoned => false,
        }
    }
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chunk(e) => write!(f, "chunk error: {e}"),
            Self::Meta(e) => write!(f, "meta error: {e}"),
            Self::Tree(e) => write!(f, "tree error: {e}"),
            Self::Codec(e) => write!(f, "invalid point: {e}"),
            Self::InvalidBucketCount => write!(f, "bucket count must be at least 1"),
            Self::TimestampOutOfRange(ts) => {
                write!(f, "group for timestamp {ts} is out of range")
            }
            Self::LockPoisoned => write!(f, "database lock poisoned"),
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Chunk(e) => Some(e),
            Self::Meta(e) => Some(e),
            Self::Tree(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::InvalidBucketCount | Self::TimestampOutOfRange(_) | Self::LockPoisoned => None,
        }
    }
}

impl From<ChunkError> for DatabaseError {
    fn from(e: ChunkError) -> Self {
        Self::Chunk(e)
    }
}

impl From<MetaError> for DatabaseError {
    fn from(e: MetaError) -> Self {
        Self::Meta(e)
    }
}

impl From<TreeError> for DatabaseError {
    fn from(e: TreeError) -> Self {
        Self::Tree(e)
    }
}

impl From<CodecError> for DatabaseError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}
