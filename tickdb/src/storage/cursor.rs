//! Stack-based traversal over the tree.
//!
//! A cursor walks the tree at a target granularity. Interior nodes whose
//! children are at least as fine as the target are terminal: their pointers
//! are yielded as reduced buckets. Leaves are always terminal and yield raw
//! points. Nodes that are not resident are paged in on demand.
//!
//! Exhaustion is reported as `Ok(false)`; errors are reserved for I/O and
//! corruption.

use std::collections::BTreeMap;

use crate::storage::level::{Level, truncate};
use crate::storage::point::{Fields, Point};
use crate::storage::rollup::{ReducedValue, Reducer, Summary, summarize_point};
use crate::storage::tree::{Node, NodeBody, NodeRef, Tree, TreeError};

/// One entry at the cursor position.
#[derive(Debug, Clone, Copy)]
pub enum Entry<'c> {
    /// A raw point from a leaf.
    Point(&'c Point),
    /// A reduced bucket from a terminal interior node.
    Bucket { key: i64, summary: &'c Summary },
}

impl Entry<'_> {
    /// Point timestamp or bucket start.
    #[must_use]
    pub const fn key(&self) -> i64 {
        match self {
            Self::Point(point) => point.timestamp,
            Self::Bucket { key, .. } => *key,
        }
    }

    /// Statistics for this entry; a raw point counts once per field.
    #[must_use]
    pub fn summary(&self) -> Summary {
        match self {
            Self::Point(point) => summarize_point(point),
            Self::Bucket { summary, .. } => (*summary).clone(),
        }
    }

    /// Apply `reducers` to produce an output point.
    ///
    /// Fields missing from the entry contribute `0.0`.
    #[must_use]
    pub fn reduce(&self, reducers: &BTreeMap<String, Reducer>) -> Point {
        let fields: Fields = reducers
            .iter()
            .map(|(name, reducer)| {
                let value = match self {
                    Self::Point(point) => point
                        .fields
                        .get(name)
                        .map(|v| ReducedValue::single(*v).reduce(*reducer)),
                    Self::Bucket { summary, .. } => {
                        summary.get(name).map(|v| v.reduce(*reducer))
                    }
                };
                (name.clone(), value.unwrap_or(0.0))
            })
            .collect();
        Point::new(self.key(), fields)
    }
}

struct Frame<'a> {
    node: NodeRef<'a>,
    index: usize,
}

impl Frame<'_> {
    fn entry(&self) -> Option<Entry<'_>> {
        entry_at(&self.node, self.index)
    }
}

fn entry_at(node: &Node, index: usize) -> Option<Entry<'_>> {
    match &node.body {
        NodeBody::Leaf(points) => points.get(index).map(Entry::Point),
        NodeBody::Interior(pointers) => pointers.get(index).map(|pointer| Entry::Bucket {
            key: pointer.key,
            summary: &pointer.summary,
        }),
    }
}

/// Whether entries of `node` are yielded directly at `target`.
fn is_terminal(node: &Node, target: Level) -> bool {
    node.is_leaf() || node.level.child() >= target
}

/// A positioned traversal over a tree.
pub struct Cursor<'a> {
    tree: &'a Tree,
    target: Level,
    reducers: BTreeMap<String, Reducer>,
    stack: Vec<Frame<'a>>,
}

impl<'a> Cursor<'a> {
    /// Create an unpositioned cursor yielding entries at `target`.
    #[must_use]
    pub const fn new(tree: &'a Tree, target: Level) -> Self {
        Self {
            tree,
            target,
            reducers: BTreeMap::new(),
            stack: Vec::new(),
        }
    }

    /// Set the reducers applied by [`Cursor::points`].
    #[must_use]
    pub fn with_reducers(mut self, reducers: BTreeMap<String, Reducer>) -> Self {
        self.reducers = reducers;
        self
    }

    /// Whether the cursor is on an entry.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.current().is_some()
    }

    /// Entry at the cursor position, if any.
    #[must_use]
    pub fn current(&self) -> Option<Entry<'_>> {
        self.stack.last().and_then(Frame::entry)
    }

    fn child_of(tree: &'a Tree, frame: &Frame<'_>) -> Result<NodeRef<'a>, TreeError> {
        let pointer =
            frame
                .node
                .pointers()
                .get(frame.index)
                .ok_or(TreeError::MissingEntry {
                    level: frame.node.level,
                    index: frame.index,
                })?;
        tree.child(pointer)
    }

    /// Position at the first entry whose bucket contains or follows `ts`.
    ///
    /// Returns `false` when nothing follows `ts`.
    pub fn seek(&mut self, ts: i64) -> Result<bool, TreeError> {
        self.stack.clear();
        let mut node = self.tree.root()?;

        loop {
            if node.is_leaf() {
                let index = node.points().partition_point(|p| p.timestamp < ts);
                self.stack.push(Frame { node, index });
                break;
            }

            let key = truncate(ts, node.level.child());
            let index = node.pointers().partition_point(|p| p.key < key);
            let exact = node.pointers().get(index).is_some_and(|p| p.key == key);
            let terminal = is_terminal(&node, self.target);
            self.stack.push(Frame { node, index });

            if terminal || !exact {
                // A later bucket starts after `ts`; settle_forward descends
                // to its first entry.
                break;
            }
            let Some(frame) = self.stack.last() else {
                break;
            };
            node = Self::child_of(self.tree, frame)?;
        }

        self.settle_forward()
    }

    /// Position at the first entry.
    pub fn first(&mut self) -> Result<bool, TreeError> {
        self.stack.clear();
        let root = self.tree.root()?;
        self.stack.push(Frame {
            node: root,
            index: 0,
        });
        self.settle_forward()
    }

    /// Position at the last entry.
    pub fn last(&mut self) -> Result<bool, TreeError> {
        self.stack.clear();
        let root = self.tree.root()?;
        let index = root.len();
        self.stack.push(Frame { node: root, index });
        self.retreat();
        self.settle_backward()
    }

    /// Advance to the next entry.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<bool, TreeError> {
        let Some(top) = self.stack.last_mut() else {
            return Ok(false);
        };
        top.index += 1;
        self.settle_forward()
    }

    /// Step back to the previous entry.
    pub fn prev(&mut self) -> Result<bool, TreeError> {
        self.retreat();
        self.settle_backward()
    }

    /// Descend from the top frame until it rests on a terminal entry,
    /// popping exhausted frames and stepping their parents forward.
    fn settle_forward(&mut self) -> Result<bool, TreeError> {
        loop {
            let Some(top) = self.stack.last() else {
                return Ok(false);
            };
            if top.index >= top.node.len() {
                self.stack.pop();
                match self.stack.last_mut() {
                    Some(parent) => parent.index += 1,
                    None => return Ok(false),
                }
                continue;
            }
            if is_terminal(&top.node, self.target) {
                return Ok(true);
            }
            let child = Self::child_of(self.tree, top)?;
            self.stack.push(Frame {
                node: child,
                index: 0,
            });
        }
    }

    /// Move the top frame back one entry, popping frames already at their
    /// start.
    fn retreat(&mut self) {
        while let Some(top) = self.stack.last_mut() {
            let len = top.node.len();
            if top.index > 0 && len > 0 {
                top.index = top.index.min(len) - 1;
                return;
            }
            self.stack.pop();
        }
    }

    /// Descend along last children until the top frame is terminal.
    fn settle_backward(&mut self) -> Result<bool, TreeError> {
        loop {
            let Some(top) = self.stack.last() else {
                return Ok(false);
            };
            if is_terminal(&top.node, self.target) {
                return Ok(true);
            }
            let child = Self::child_of(self.tree, top)?;
            let len = child.len();
            if len == 0 {
                self.retreat();
                continue;
            }
            self.stack.push(Frame {
                node: child,
                index: len - 1,
            });
        }
    }

    /// Remaining entries of the current frame with the reducers applied.
    ///
    /// Leaves the cursor on the frame's last entry, so the following
    /// [`Cursor::next`] moves on to the next frame.
    pub fn points(&mut self) -> Vec<Point> {
        let Some(top) = self.stack.last_mut() else {
            return Vec::new();
        };
        let len = top.node.len();
        if top.index >= len {
            return Vec::new();
        }
        let start = top.index;
        top.index = len - 1;

        let node: &Node = &top.node;
        (start..len)
            .filter_map(|index| entry_at(node, index))
            .map(|entry| entry.reduce(&self.reducers))
            .collect()
    }
}
