//! Node structures and their on-disk encoding.
//!
//! # Node payload format
//!
//! ```text
//! +---------+---------------------------------------------------+
//! | 0-1     | flags (u16 BE): level bit | leaf/interior flag    |
//! | 2-N     | entries, each {len u16 BE, entry bytes}           |
//! +---------+---------------------------------------------------+
//! ```
//!
//! Leaf entries are encoded points. Interior entries are node pointers:
//!
//! ```text
//! {key i64, position i64, repeated {name_len u16, name, sum, max, min,
//!  first, last f64, count u16}}
//! ```

#![allow(clippy::cast_possible_wrap)]

use crate::storage::chunk::META_REGION_SIZE;
use crate::storage::codec::{CodecError, Decoder, Encoder, MAX_PREFIXED_LEN};
use crate::storage::level::{Level, exact_level};
use crate::storage::point::Point;
use crate::storage::rollup::{REDUCED_VALUE_LEN, ReducedValue, Summary, merge_into, summarize_points};

/// Bits of the header holding the level.
pub const LEVEL_MASK: u16 = 0x0FFF;
/// Bits of the header holding the node kind.
pub const KIND_MASK: u16 = 0x3000;
/// Kind flag for interior nodes.
pub const INTERIOR_FLAG: u16 = 0x1000;
/// Kind flag for leaf nodes.
pub const LEAF_FLAG: u16 = 0x2000;

/// Index of a resident node in the tree arena.
pub type NodeId = usize;

/// Interior entry pointing at one child bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct NodePointer {
    /// Child bucket start, truncated to the child's level.
    pub key: i64,
    /// Chunk offset of the child's last flushed copy; 0 while dirty.
    pub position: u64,
    /// Arena slot when the child is resident.
    pub child: Option<NodeId>,
    /// Cached statistics for the child subtree.
    pub summary: Summary,
}

impl NodePointer {
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        16 + summary_encoded_len(&self.summary)
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let len = self.encoded_len();
        if len > MAX_PREFIXED_LEN {
            return Err(CodecError::TooLong {
                len,
                max: MAX_PREFIXED_LEN,
            });
        }
        if self.position < META_REGION_SIZE {
            return Err(CodecError::InvalidPosition(self.position as i64));
        }

        let mut enc = Encoder::with_capacity(len);
        enc.put_i64(self.key);
        enc.put_i64(self.position as i64);
        for (name, value) in &self.summary {
            enc.put_prefixed(name.as_bytes())?;
            value.encode(&mut enc);
        }
        Ok(enc.into_bytes())
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut dec = Decoder::new(bytes);
        let key = dec.i64()?;
        let raw_position = dec.i64()?;
        let position = u64::try_from(raw_position)
            .ok()
            .filter(|pos| *pos >= META_REGION_SIZE)
            .ok_or(CodecError::InvalidPosition(raw_position))?;

        let mut summary = Summary::new();
        while !dec.is_empty() {
            let name = dec.prefixed_str()?;
            let value = ReducedValue::decode(&mut dec)?;
            summary.insert(name, value);
        }

        Ok(Self {
            key,
            position,
            child: None,
            summary,
        })
    }
}

/// Encoded size of the field entries of a summary.
#[must_use]
pub fn summary_encoded_len(summary: &Summary) -> usize {
    summary
        .keys()
        .map(|name| 2 + name.len() + REDUCED_VALUE_LEN)
        .sum()
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeBody {
    /// Timestamp-ordered raw points.
    Leaf(Vec<Point>),
    /// Key-ordered child pointers.
    Interior(Vec<NodePointer>),
}

/// An in-memory, decoded node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub level: Level,
    pub body: NodeBody,
    /// Index of the single pointer whose child has unflushed changes.
    pub dirty: Option<usize>,
}

impl Node {
    #[must_use]
    pub const fn empty_leaf(level: Level) -> Self {
        Self {
            level,
            body: NodeBody::Leaf(Vec::new()),
            dirty: None,
        }
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self.body, NodeBody::Leaf(_))
    }

    /// Number of entries (points or pointers).
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.body {
            NodeBody::Leaf(points) => points.len(),
            NodeBody::Interior(pointers) => pointers.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a leaf at this level may store a point at `ts` directly.
    ///
    /// Points are kept no finer than one level below their leaf, so that
    /// every point has a distinct key when the leaf is expanded.
    #[must_use]
    pub fn can_hold(&self, ts: i64) -> bool {
        exact_level(ts) <= self.level.child()
    }

    /// Leaf points; empty for interior nodes.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        match &self.body {
            NodeBody::Leaf(points) => points,
            NodeBody::Interior(_) => &[],
        }
    }

    /// Interior pointers; empty for leaves.
    #[must_use]
    pub fn pointers(&self) -> &[NodePointer] {
        match &self.body {
            NodeBody::Leaf(_) => &[],
            NodeBody::Interior(pointers) => pointers,
        }
    }

    /// Statistics from the points or cached pointer summaries, without
    /// descending into children.
    #[must_use]
    pub fn shallow_summary(&self) -> Summary {
        match &self.body {
            NodeBody::Leaf(points) => summarize_points(points),
            NodeBody::Interior(pointers) => {
                let mut summary = Summary::new();
                for pointer in pointers {
                    merge_into(&mut summary, &pointer.summary);
                }
                summary
            }
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut enc = Encoder::new();
        match &self.body {
            NodeBody::Leaf(points) => {
                enc.put_u16(self.level.bits() | LEAF_FLAG);
                for point in points {
                    enc.put_prefixed(&point.encode()?)?;
                }
            }
            NodeBody::Interior(pointers) => {
                enc.put_u16(self.level.bits() | INTERIOR_FLAG);
                for pointer in pointers {
                    enc.put_prefixed(&pointer.encode()?)?;
                }
            }
        }
        Ok(enc.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut dec = Decoder::new(bytes);
        let flags = dec.u16()?;
        let level =
            Level::from_bits(flags & LEVEL_MASK).ok_or(CodecError::InvalidNodeHeader(flags))?;

        let body = match flags & KIND_MASK {
            LEAF_FLAG => {
                let mut points = Vec::new();
                while !dec.is_empty() {
                    points.push(Point::decode(dec.prefixed()?)?);
                }
                NodeBody::Leaf(points)
            }
            INTERIOR_FLAG => {
                let mut pointers = Vec::new();
                while !dec.is_empty() {
                    pointers.push(NodePointer::decode(dec.prefixed()?)?);
                }
                NodeBody::Interior(pointers)
            }
            _ => return Err(CodecError::InvalidNodeHeader(flags)),
        };

        Ok(Self {
            level,
            body,
            dirty: None,
        })
    }
}
