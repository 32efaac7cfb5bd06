//! The mesh: a directed multi-entry graph fusing many linear traces.
//!
//! Nodes are trace entries (or synthetic no-ops) and edges record observed
//! succession. Every node carries the set of option assignments under which
//! it was seen and a probability counter bumped on every merge that touches
//! it.
//!
//! # Representation
//!
//! Predecessor and successor references are relational, not owning: nodes
//! address each other through [`NodeId`] indices into the mesh's arena. All
//! edge edits are local updates to the node table, and no reference cycles
//! can form. Slot 0 of the arena is the distinguished start node (content
//! hash `"0"`, no payload, no predecessors); removed nodes leave a vacant
//! slot so ids are never reused.
//!
//! # Invariants
//!
//! - Edge reciprocity: `b ∈ a.next` ⇔ `a ∈ b.prev`.
//! - The start node has no predecessors and every live node is reachable
//!   from it.
//! - The successors of any node have pairwise-distinct content hashes.
//! - Only no-op nodes (and the start node) carry no trace entry.
//!
//! Merging is in [`merge`], the optimization passes in [`optimize`].
pub mod lcs;
pub mod merge;
pub mod optimize;

#[cfg(test)]
mod tests;

use std::fmt;

use crate::options::OptionAssignment;
use crate::trace::TraceEntry;

/// Index of a node within its owning mesh.
///
/// Ids are assigned monotonically at node creation, are unique within the
/// mesh, and are never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// The distinguished start node present in every mesh.
    pub const START: NodeId = NodeId(0);

    /// The raw id value.
    pub fn value(self) -> u64 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a node stands for: a recorded bus operation, or nothing.
///
/// No-op nodes are synthesized by the optimizer to factor common
/// predecessors; they shape the graph but generate no code. The start node
/// is also payload-free.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodePayload {
    /// A recorded bus operation.
    Op(TraceEntry),
    /// A synthetic node that generates no code.
    Noop,
}

/// One node of a [`Mesh`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshNode {
    /// Mesh-scoped unique id.
    pub id: NodeId,
    /// The trace entry this node stands for, or [`NodePayload::Noop`].
    pub payload: NodePayload,
    /// Content hash: derived from the entry for regular nodes, `"0"` for
    /// the start node, a synthetic unique string for no-ops.
    pub hash: String,
    /// Disjunction of option assignments under which this node was
    /// observed. Empty means unconditional.
    pub options: Vec<OptionAssignment>,
    /// Incremented by every merge that touches this node; drives the
    /// likeliest-path tail selection for emission.
    pub probability: u64,
    next: Vec<NodeId>,
    prev: Vec<NodeId>,
}

impl MeshNode {
    /// Successor node ids, in the order the edges were created.
    pub fn successors(&self) -> &[NodeId] {
        &self.next
    }

    /// Predecessor node ids, in the order the edges were created.
    pub fn predecessors(&self) -> &[NodeId] {
        &self.prev
    }

    /// The trace entry, or `None` for no-op and start nodes.
    pub fn entry(&self) -> Option<&TraceEntry> {
        match &self.payload {
            NodePayload::Op(entry) => Some(entry),
            NodePayload::Noop => None,
        }
    }

    /// `true` when this node generates no code.
    pub fn is_noop(&self) -> bool {
        matches!(self.payload, NodePayload::Noop)
    }

    /// `true` when at least one assignment in the option-set constrains an
    /// option; such a node can head an `if` branch.
    pub fn has_condition(&self) -> bool {
        self.options.iter().any(|a| !a.is_empty())
    }
}

/// A directed multi-entry graph of trace entries built by merging branches.
#[derive(Clone, Debug)]
pub struct Mesh {
    slots: Vec<Option<MeshNode>>,
    next_id: u64,
    merged_traces: u64,
}

impl Default for Mesh {
    fn default() -> Self {
        Mesh::new()
    }
}

impl Mesh {
    /// Creates a mesh containing only the start node.
    pub fn new() -> Self {
        let start = MeshNode {
            id: NodeId::START,
            payload: NodePayload::Noop,
            hash: "0".to_owned(),
            options: Vec::new(),
            probability: 0,
            next: Vec::new(),
            prev: Vec::new(),
        };
        Mesh {
            slots: vec![Some(start)],
            next_id: 1,
            merged_traces: 0,
        }
    }

    /// The start node's id.
    pub fn start(&self) -> NodeId {
        NodeId::START
    }

    /// Number of traces merged into this mesh so far.
    pub fn merged_traces(&self) -> u64 {
        self.merged_traces
    }

    pub(crate) fn bump_merged_traces(&mut self) {
        self.merged_traces += 1;
    }

    /// Looks up a node, returning `None` for unknown or removed ids.
    pub fn node(&self, id: NodeId) -> Option<&MeshNode> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut MeshNode> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// The content hash of `id`, if the node exists.
    pub fn hash_of(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|n| n.hash.as_str())
    }

    /// Iterates all live nodes except the start node, in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &MeshNode> {
        self.slots
            .iter()
            .skip(1)
            .filter_map(Option::as_ref)
    }

    /// Ids of all live nodes except the start node, in creation order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().map(|n| n.id).collect()
    }

    /// Number of live nodes excluding the start node.
    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    /// Creates a new unlinked node and returns its id.
    ///
    /// A no-op node receives a synthetic unique hash; a regular node starts
    /// with an empty hash and a default payload, both overwritten when the
    /// merger populates it.
    pub fn create_node(&mut self, noop: bool) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let (payload, hash) = if noop {
            (NodePayload::Noop, format!("ffffff noop id={id}"))
        } else {
            (NodePayload::Op(TraceEntry::default()), String::new())
        };
        let node = MeshNode {
            id,
            payload,
            hash,
            options: Vec::new(),
            probability: 0,
            next: Vec::new(),
            prev: Vec::new(),
        };
        self.slots.push(Some(node));
        id
    }

    /// Creates a node for a trace entry, hashed from the entry's content.
    pub fn add_entry_node(&mut self, entry: TraceEntry) -> NodeId {
        let id = self.create_node(false);
        if let Some(n) = self.node_mut(id) {
            n.hash = entry.content_hash();
            n.payload = NodePayload::Op(entry);
        }
        id
    }

    /// Links `id` to the tail of the first path through the mesh.
    pub fn append_node(&mut self, id: NodeId) {
        let mut tail = NodeId::START;
        while let Some(&next) = self.node(tail).and_then(|n| n.next.first()) {
            tail = next;
        }
        self.link(tail, id);
    }

    /// Links `id` as a new successor of `after`.
    pub fn insert_node(&mut self, after: NodeId, id: NodeId) {
        self.link(after, id);
    }

    /// Adds the reciprocal edge pair `from → to`.
    pub(crate) fn link(&mut self, from: NodeId, to: NodeId) {
        if let Some(n) = self.node_mut(from) {
            n.next.push(to);
        }
        if let Some(n) = self.node_mut(to) {
            n.prev.push(from);
        }
    }

    /// Removes the reciprocal edge pair `from → to`.
    pub(crate) fn unlink(&mut self, from: NodeId, to: NodeId) {
        if let Some(n) = self.node_mut(from) {
            n.next.retain(|&x| x != to);
        }
        if let Some(n) = self.node_mut(to) {
            n.prev.retain(|&x| x != from);
        }
    }

    /// Vacates a node's slot. The caller must have detached all edges.
    pub(crate) fn remove_node(&mut self, id: NodeId) {
        if id == NodeId::START {
            return;
        }
        if let Some(slot) = self.slots.get_mut(id.index()) {
            *slot = None;
        }
    }

    // -----------------------------------------------------------------------
    // Path queries
    // -----------------------------------------------------------------------

    /// The path from `from` following the first successor at every step.
    ///
    /// `from` itself is not part of the path; an empty vector means `from`
    /// has no successors.
    pub fn first_path(&self, from: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut cur = from;
        while let Some(&next) = self.node(cur).and_then(|n| n.next.first()) {
            path.push(next);
            cur = next;
        }
        path
    }

    /// The path enumerated after `last`, or `None` when `last` was the
    /// final one.
    ///
    /// Backtracks from the tail of `last` to the deepest branching node
    /// with an untaken sibling, then extends along first successors. Paths
    /// must be fed back in enumeration order, starting from
    /// [`Mesh::first_path`].
    pub fn next_path(&self, from: NodeId, last: &[NodeId]) -> Option<Vec<NodeId>> {
        if last.len() <= 1 {
            return None;
        }

        let mut stack: Vec<NodeId> = Vec::with_capacity(last.len() + 1);
        stack.push(from);
        stack.extend_from_slice(last);

        let mut came_from = *stack.last()?;
        stack.pop();

        let mut prefix: Option<Vec<NodeId>> = None;
        while let Some(&top) = stack.last() {
            let node = self.node(top)?;
            if node.next.len() > 1 {
                let came_hash = self.hash_of(came_from)?;
                let found = node
                    .next
                    .iter()
                    .position(|&s| self.hash_of(s) == Some(came_hash))?;
                if found + 1 != node.next.len() {
                    let mut p = stack.clone();
                    p.push(node.next[found + 1]);
                    prefix = Some(p);
                    break;
                }
            }
            came_from = top;
            stack.pop();
        }

        let mut path = prefix?;
        // drop the synthetic `from` element
        path.remove(0);

        let mut cur = *path.last()?;
        while let Some(&next) = self.node(cur).and_then(|n| n.next.first()) {
            path.push(next);
            cur = next;
        }
        Some(path)
    }

    /// Iterates every root-to-leaf path below `from`.
    pub fn paths(&self, from: NodeId) -> Paths<'_> {
        let first = self.first_path(from);
        Paths {
            mesh: self,
            from,
            pending: (!first.is_empty()).then_some(first),
        }
    }

    /// The path from `from` following the most probable successor at every
    /// step; a later successor wins a probability tie.
    pub fn likely_path(&self, from: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut cur = from;
        loop {
            let Some(node) = self.node(cur) else { break };
            let mut best: Option<NodeId> = None;
            let mut best_p = 0u64;
            for &s in &node.next {
                let p = self.node(s).map_or(0, |n| n.probability);
                if best.is_none() || p >= best_p {
                    best = Some(s);
                    best_p = p;
                }
            }
            let Some(next) = best else { break };
            path.push(next);
            cur = next;
        }
        path
    }

    /// The tail of the likeliest path — the last node of the mesh for
    /// emission purposes. The start node itself when the mesh is empty.
    pub fn last_node(&self) -> NodeId {
        self.likely_path(NodeId::START)
            .last()
            .copied()
            .unwrap_or(NodeId::START)
    }

    /// `true` when any path below `from` passes through `find`.
    pub fn any_path_contains(&self, from: NodeId, find: NodeId) -> bool {
        self.paths(from).any(|p| p.contains(&find))
    }

    /// The common merge point of the branches leaving `at`: over every pair
    /// of distinct successors and every path through each, the earliest
    /// node reachable through both; a candidate reachable from the current
    /// one supersedes it.
    ///
    /// Returns `None` when `at` does not branch or the branches never
    /// reconverge (an incomplete mesh for emission purposes).
    pub fn common_merge_point(&self, at: NodeId) -> Option<NodeId> {
        let succs = self.node(at)?.next.clone();
        let mut found: Option<NodeId> = None;

        for i in 0..succs.len() {
            for j in (i + 1)..succs.len() {
                for left in self.paths(succs[i]) {
                    for right in self.paths(succs[j]) {
                        let candidate = left.iter().copied().find(|n| right.contains(n));
                        let Some(candidate) = candidate else { continue };
                        match found {
                            None => found = Some(candidate),
                            Some(cur) => {
                                if self.any_path_contains(cur, candidate) {
                                    found = Some(candidate);
                                }
                            }
                        }
                    }
                }
            }
        }

        found
    }
}

/// Iterator over every path below a node, in branch-sibling order.
///
/// Produced by [`Mesh::paths`].
pub struct Paths<'a> {
    mesh: &'a Mesh,
    from: NodeId,
    pending: Option<Vec<NodeId>>,
}

impl Iterator for Paths<'_> {
    type Item = Vec<NodeId>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.pending.take()?;
        self.pending = self.mesh.next_path(self.from, &current);
        Some(current)
    }
}
