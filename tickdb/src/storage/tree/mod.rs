//! Time-hierarchical tree.
//!
//! The tree branches on calendar components: the root has one child per year,
//! a year node one child per month, and so on down to microseconds. Leaves hold
//! raw points; interior nodes hold pointers annotated with rollup summaries of
//! their child subtree.
//!
//! # Residency
//!
//! The writer keeps the nodes it has touched in an arena indexed by
//! [`NodeId`]. Nodes that were never touched stay on disk and are referenced
//! only by chunk position. Readers page such nodes in through a shared cache
//! keyed by position; chunks are never rewritten, so a cached node stays valid
//! for as long as the position does.
//!
//! # Dirty branch
//!
//! At most one pointer per interior node is dirty, so unflushed changes always
//! form a single root-to-leaf path. Moving a write to a different child first
//! settles (reduces and flushes) the previously dirty one.

mod node;

use std::collections::HashMap;
use std::ops::{Deref, Range};
use std::sync::{Arc, Mutex, PoisonError};

pub use node::{Node, NodeBody, NodeId, NodePointer, summary_encoded_len};

use crate::storage::chunk::{ChunkError, ChunkFile};
use crate::storage::codec::CodecError;
use crate::storage::level::{Level, truncate};
use crate::storage::point::Point;
use crate::storage::rollup::{Summary, summarize_point};

/// A node borrowed from the arena or shared from the page cache.
#[derive(Debug)]
pub enum NodeRef<'a> {
    Resident(&'a Node),
    Paged(Arc<Node>),
}

impl Deref for NodeRef<'_> {
    type Target = Node;

    fn deref(&self) -> &Node {
        match self {
            Self::Resident(node) => node,
            Self::Paged(node) => node,
        }
    }
}

/// The tree and the file it lives in.
pub struct Tree {
    file: ChunkFile,
    /// Resident nodes. `None` marks a free slot.
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    root: NodeId,
    /// Position of the last flushed root.
    root_position: u64,
    /// Root summary, refreshed after every mutation.
    summary: Summary,
    /// Unflushed changes exist.
    modified: bool,
    /// Decoded nodes read on behalf of readers, by chunk position.
    pages: Mutex<HashMap<u64, Arc<Node>>>,
}

impl Tree {
    /// Write an empty root leaf at the append offset and build a tree on it.
    pub fn create(mut file: ChunkFile) -> Result<Self, TreeError> {
        let root = Node::empty_leaf(Level::Root);
        let (root_position, _) = file.write_chunk(&root.encode()?)?;
        Ok(Self::with_root(file, root, root_position))
    }

    /// Load the root node stored at `root_position`.
    pub fn open(file: ChunkFile, root_position: u64) -> Result<Self, TreeError> {
        let root = Node::decode(&file.read_chunk_at(root_position)?)?;
        Ok(Self::with_root(file, root, root_position))
    }

    fn with_root(file: ChunkFile, root: Node, root_position: u64) -> Self {
        let summary = root.shallow_summary();
        Self {
            file,
            nodes: vec![Some(root)],
            free: Vec::new(),
            root: 0,
            root_position,
            summary,
            modified: false,
            pages: Mutex::new(HashMap::new()),
        }
    }

    /// Statistics over every point in the tree.
    #[must_use]
    pub const fn summary(&self) -> &Summary {
        &self.summary
    }

    /// Position of the last flushed root.
    #[must_use]
    pub const fn root_position(&self) -> u64 {
        self.root_position
    }

    /// Whether there are changes not yet written by [`Tree::flush`].
    #[must_use]
    pub const fn is_modified(&self) -> bool {
        self.modified
    }

    #[must_use]
    pub const fn file(&self) -> &ChunkFile {
        &self.file
    }

    /// Get mutable access to the underlying chunk file.
    #[allow(clippy::missing_const_for_fn)] // mutable references can't be const
    pub fn file_mut(&mut self) -> &mut ChunkFile {
        &mut self.file
    }

    /// Number of nodes currently resident in the arena.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn root(&self) -> Result<NodeRef<'_>, TreeError> {
        Ok(NodeRef::Resident(self.node(self.root)?))
    }

    /// Resolve a pointer's child from the arena or the page cache.
    pub fn child(&self, pointer: &NodePointer) -> Result<NodeRef<'_>, TreeError> {
        match pointer.child {
            Some(id) => Ok(NodeRef::Resident(self.node(id)?)),
            None => Ok(NodeRef::Paged(self.page(pointer.position)?)),
        }
    }

    /// Read-only access to the node at `position`, through the page cache.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn page(&self, position: u64) -> Result<Arc<Node>, TreeError> {
        {
            let pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(node) = pages.get(&position) {
                return Ok(Arc::clone(node));
            }
        }

        let node = Arc::new(self.read_node(position)?);
        let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(pages.entry(position).or_insert(node)))
    }

    fn read_node(&self, position: u64) -> Result<Node, TreeError> {
        Ok(Node::decode(&self.file.read_chunk_at(position)?)?)
    }

    fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.nodes
            .get(id)
            .and_then(Option::as_ref)
            .ok_or(TreeError::MissingNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.nodes
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(TreeError::MissingNode(id))
    }

    fn pointers(&self, id: NodeId) -> Result<&[NodePointer], TreeError> {
        match &self.node(id)?.body {
            NodeBody::Interior(pointers) => Ok(pointers),
            NodeBody::Leaf(_) => Err(TreeError::NotInterior(id)),
        }
    }

    fn pointers_mut(&mut self, id: NodeId) -> Result<&mut Vec<NodePointer>, TreeError> {
        match &mut self.node_mut(id)?.body {
            NodeBody::Interior(pointers) => Ok(pointers),
            NodeBody::Leaf(_) => Err(TreeError::NotInterior(id)),
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id] = Some(node);
            id
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    /// Free a resident node and everything resident below it.
    fn release(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(id).and_then(Option::take) {
            self.free.push(id);
            if let NodeBody::Interior(pointers) = node.body {
                self.release_pointers(pointers);
            }
        }
    }

    fn release_pointers(&mut self, pointers: Vec<NodePointer>) {
        for pointer in pointers {
            if let Some(child) = pointer.child {
                self.release(child);
            }
        }
    }

    /// Make the child at `index` resident and return its arena slot.
    ///
    /// A copy already paged in by a reader is moved out of the cache rather
    /// than read again.
    fn resident_child(&mut self, parent: NodeId, index: usize) -> Result<NodeId, TreeError> {
        let pointer = self
            .pointers(parent)?
            .get(index)
            .ok_or(TreeError::MissingPointer { node: parent, index })?;
        if let Some(child) = pointer.child {
            return Ok(child);
        }
        let position = pointer.position;

        let cached = self
            .pages
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&position);
        let node = match cached {
            Some(shared) => Arc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone()),
            None => self.read_node(position)?,
        };

        let child = self.alloc(node);
        if let Some(pointer) = self.pointers_mut(parent)?.get_mut(index) {
            pointer.child = Some(child);
        }
        Ok(child)
    }

    /// Make `index` the dirty pointer of `parent`.
    fn mark_dirty(&mut self, parent: NodeId, index: usize) -> Result<(), TreeError> {
        let node = self.node_mut(parent)?;
        node.dirty = Some(index);
        if let NodeBody::Interior(pointers) = &mut node.body {
            if let Some(pointer) = pointers.get_mut(index) {
                pointer.position = 0;
            }
        }
        Ok(())
    }

    /// Insert or replace a point.
    pub fn insert(&mut self, point: Point) -> Result<(), TreeError> {
        self.insert_at(self.root, point)?;
        self.summary = self.reduce(self.root)?;
        self.modified = true;
        Ok(())
    }

    fn insert_at(&mut self, id: NodeId, point: Point) -> Result<(), TreeError> {
        let node = self.node_mut(id)?;
        let fits = node.can_hold(point.timestamp);
        if let NodeBody::Leaf(points) = &mut node.body {
            if fits {
                match points.binary_search_by_key(&point.timestamp, |p| p.timestamp) {
                    Ok(index) => points[index] = point,
                    Err(index) => points.insert(index, point),
                }
                return Ok(());
            }
            self.expand(id)?;
        }

        let node = self.node(id)?;
        let child_level = node.level.child();
        let key = truncate(point.timestamp, child_level);
        let dirty = node.dirty;
        let pointers = self.pointers(id)?;
        let index = pointers.partition_point(|p| p.key < key);
        let exists = pointers.get(index).is_some_and(|p| p.key == key);

        // Settle the old dirty sibling before indices can shift.
        if let Some(previous) = dirty.filter(|d| !exists || *d != index) {
            self.settle_child(id, previous)?;
        }

        let child = if exists {
            self.resident_child(id, index)?
        } else {
            let child = self.alloc(Node::empty_leaf(child_level));
            self.pointers_mut(id)?.insert(
                index,
                NodePointer {
                    key,
                    position: 0,
                    child: Some(child),
                    summary: Summary::new(),
                },
            );
            child
        };
        self.mark_dirty(id, index)?;

        self.insert_at(child, point)
    }

    /// Turn a leaf into an interior node with one flushed single-point leaf
    /// per existing point.
    fn expand(&mut self, id: NodeId) -> Result<(), TreeError> {
        let node = self.node(id)?;
        let child_level = node.level.child();
        let points = node.points().to_vec();
        tracing::trace!(level = %node.level, points = points.len(), "expanding leaf");

        let mut pointers = Vec::with_capacity(points.len());
        for point in points {
            let key = truncate(point.timestamp, child_level);
            let summary = summarize_point(&point);
            let leaf = Node {
                level: child_level,
                body: NodeBody::Leaf(vec![point]),
                dirty: None,
            };
            let (position, _) = self.file.write_chunk(&leaf.encode()?)?;
            let child = self.alloc(leaf);
            pointers.push(NodePointer {
                key,
                position,
                child: Some(child),
                summary,
            });
        }

        let node = self.node_mut(id)?;
        node.body = NodeBody::Interior(pointers);
        node.dirty = None;
        Ok(())
    }

    /// Recompute the summary of `id`, refreshing the dirty child's cached
    /// summary on the way.
    fn reduce(&mut self, id: NodeId) -> Result<Summary, TreeError> {
        let node = self.node(id)?;
        let dirty = node
            .dirty
            .and_then(|index| Some((index, node.pointers().get(index)?.child?)));

        if let Some((index, child)) = dirty {
            let summary = self.reduce(child)?;
            if let Some(pointer) = self.pointers_mut(id)?.get_mut(index) {
                pointer.summary = summary;
            }
        }

        Ok(self.node(id)?.shallow_summary())
    }

    /// Reduce and flush the child at `index`, recording its new position.
    fn settle_child(&mut self, parent: NodeId, index: usize) -> Result<(), TreeError> {
        let child = self
            .pointers(parent)?
            .get(index)
            .and_then(|pointer| pointer.child);

        let update = match child {
            Some(child) => Some((self.reduce(child)?, self.flush_node(child)?)),
            None => None,
        };

        let node = self.node_mut(parent)?;
        if node.dirty == Some(index) {
            node.dirty = None;
        }
        if let (Some((summary, position)), NodeBody::Interior(pointers)) = (update, &mut node.body)
        {
            if let Some(pointer) = pointers.get_mut(index) {
                pointer.summary = summary;
                pointer.position = position;
            }
        }
        Ok(())
    }

    /// Write the dirty path below `id`, then `id` itself. Returns the chunk
    /// position of `id`.
    fn flush_node(&mut self, id: NodeId) -> Result<u64, TreeError> {
        if let Some(index) = self.node(id)?.dirty {
            self.settle_child(id, index)?;
        }
        let bytes = self.node(id)?.encode()?;
        let (position, _) = self.file.write_chunk(&bytes)?;
        Ok(position)
    }

    /// Write every dirty node bottom-up and return the new root position.
    ///
    /// Nothing is written if the tree has not changed since the last flush.
    pub fn flush(&mut self) -> Result<u64, TreeError> {
        if !self.modified {
            return Ok(self.root_position);
        }
        self.summary = self.reduce(self.root)?;
        self.root_position = self.flush_node(self.root)?;
        self.modified = false;
        Ok(self.root_position)
    }

    /// Remove every point with `from <= timestamp < to`.
    ///
    /// An empty or inverted range is a no-op.
    pub fn delete(&mut self, from: i64, to: i64) -> Result<(), TreeError> {
        if from >= to {
            return Ok(());
        }

        if self.clean(self.root, from, to)? {
            let root = self.node_mut(self.root)?;
            let level = root.level;
            let old = std::mem::replace(root, Node::empty_leaf(level));
            if let NodeBody::Interior(pointers) = old.body {
                self.release_pointers(pointers);
            }
        }

        self.summary = self.reduce(self.root)?;
        self.modified = true;
        Ok(())
    }

    /// Drop pointers in `range`, releasing resident children and keeping the
    /// dirty index aligned.
    fn remove_pointers(&mut self, id: NodeId, range: Range<usize>) -> Result<(), TreeError> {
        if range.is_empty() {
            return Ok(());
        }
        let removed: Vec<NodePointer> = self.pointers_mut(id)?.drain(range.clone()).collect();

        let node = self.node_mut(id)?;
        node.dirty = match node.dirty {
            Some(index) if range.contains(&index) => None,
            Some(index) if index >= range.end => Some(index - range.len()),
            other => other,
        };

        self.release_pointers(removed);
        Ok(())
    }

    /// Remove `[from, to)` below `id`. Returns `true` when `id` is left empty.
    fn clean(&mut self, id: NodeId, from: i64, to: i64) -> Result<bool, TreeError> {
        let node = self.node_mut(id)?;
        if let NodeBody::Leaf(points) = &mut node.body {
            points.retain(|p| p.timestamp < from || p.timestamp >= to);
            return Ok(points.is_empty());
        }

        let child_level = node.level.child();
        let dirty = node.dirty;
        let first_key = truncate(from, child_level);
        let last_key = truncate(to, child_level);

        if first_key == last_key {
            // The whole range falls inside one child.
            let pointers = self.pointers(id)?;
            let index = pointers.partition_point(|p| p.key < first_key);
            if !pointers.get(index).is_some_and(|p| p.key == first_key) {
                return Ok(pointers.is_empty());
            }

            if let Some(previous) = dirty.filter(|d| *d != index) {
                self.settle_child(id, previous)?;
            }
            let child = self.resident_child(id, index)?;
            self.mark_dirty(id, index)?;
            if self.clean(child, from, to)? {
                self.remove_pointers(id, index..index + 1)?;
            }
            return Ok(self.node(id)?.is_empty());
        }

        if let Some(previous) = dirty {
            self.settle_child(id, previous)?;
        }

        let pointers = self.pointers(id)?;
        let start = pointers.partition_point(|p| p.key < first_key);
        let end = pointers.partition_point(|p| p.key < last_key);
        let starts_inside = pointers.get(start).is_some_and(|p| p.key == first_key);
        let ends_inside = pointers.get(end).is_some_and(|p| p.key == last_key);

        let mut drop_start = start;
        if starts_inside && from != first_key {
            let child = self.resident_child(id, start)?;
            if !self.clean_from(child, from)? {
                self.settle_child(id, start)?;
                drop_start = start + 1;
            }
        }

        let mut drop_end = end;
        if ends_inside && to != last_key {
            let child = self.resident_child(id, end)?;
            if self.clean_to(child, to)? {
                drop_end = end + 1;
            } else {
                self.settle_child(id, end)?;
            }
        }

        self.remove_pointers(id, drop_start..drop_end)?;
        Ok(self.node(id)?.is_empty())
    }

    /// Remove everything at or after `from` below `id`.
    fn clean_from(&mut self, id: NodeId, from: i64) -> Result<bool, TreeError> {
        let node = self.node_mut(id)?;
        if let NodeBody::Leaf(points) = &mut node.body {
            let keep = points.partition_point(|p| p.timestamp < from);
            points.truncate(keep);
            return Ok(points.is_empty());
        }

        let boundary = truncate(from, node.level.child());
        let dirty = node.dirty;
        if let Some(previous) = dirty {
            self.settle_child(id, previous)?;
        }

        let pointers = self.pointers(id)?;
        let len = pointers.len();
        let index = pointers.partition_point(|p| p.key < boundary);
        let mut keep = index;

        if from != boundary && pointers.get(index).is_some_and(|p| p.key == boundary) {
            let child = self.resident_child(id, index)?;
            if !self.clean_from(child, from)? {
                self.settle_child(id, index)?;
                keep = index + 1;
            }
        }

        self.remove_pointers(id, keep..len)?;
        Ok(self.node(id)?.is_empty())
    }

    /// Remove everything before `to` below `id`.
    fn clean_to(&mut self, id: NodeId, to: i64) -> Result<bool, TreeError> {
        let node = self.node_mut(id)?;
        if let NodeBody::Leaf(points) = &mut node.body {
            let cut = points.partition_point(|p| p.timestamp < to);
            points.drain(..cut);
            return Ok(points.is_empty());
        }

        let boundary = truncate(to, node.level.child());
        let dirty = node.dirty;
        if let Some(previous) = dirty {
            self.settle_child(id, previous)?;
        }

        let pointers = self.pointers(id)?;
        let index = pointers.partition_point(|p| p.key < boundary);
        let mut drop_end = index;

        if to != boundary && pointers.get(index).is_some_and(|p| p.key == boundary) {
            let child = self.resident_child(id, index)?;
            if self.clean_to(child, to)? {
                drop_end = index + 1;
            } else {
                self.settle_child(id, index)?;
            }
        }

        self.remove_pointers(id, 0..drop_end)?;
        Ok(self.node(id)?.is_empty())
    }
}

/// Errors that can occur during tree operations.
#[derive(Debug)]
pub enum TreeError {
    /// Chunk I/O or integrity error.
    Chunk(ChunkError),
    /// Node payload could not be encoded or decoded.
    Codec(CodecError),
    /// Arena slot is empty.
    MissingNode(NodeId),
    /// Pointer index out of range.
    MissingPointer { node: NodeId, index: usize },
    /// Pointer access on a leaf.
    NotInterior(NodeId),
    /// Cursor stepped onto an entry the node does not have.
    MissingEntry { level: Level, index: usize },
}

impl TreeError {
    /// Whether this error means the bytes on disk are damaged.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        match self {
            Self::Chunk(e) => e.is_corruption(),
            Self::Codec(_) => true,
            Self::MissingNode(_)
            | Self::MissingPointer { .. }
            | Self::NotInterior(_)
            | Self::MissingEntry { .. } => false,
        }
    }
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chunk(e) => write!(f, "chunk error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::MissingNode(id) => write!(f, "node {id} is not resident"),
            Self::MissingPointer { node, index } => {
                write!(f, "node {node} has no pointer at index {index}")
            }
            Self::NotInterior(id) => write!(f, "node {id} is not an interior node"),
            Self::MissingEntry { level, index } => {
                write!(f, "{level} node has no entry at index {index}")
            }
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Chunk(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::MissingNode(_)
            | Self::MissingPointer { .. }
            | Self::NotInterior(_)
            | Self::MissingEntry { .. } => None,
        }
    }
}

impl From<ChunkError> for TreeError {
    fn from(e: ChunkError) -> Self {
        Self::Chunk(e)
    }
}

impl From<CodecError> for TreeError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

#[cfg(test)]
mod tests;
