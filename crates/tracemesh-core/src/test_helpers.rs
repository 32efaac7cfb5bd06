//! Shared test helper functions for constructing mesh and trace fixtures.
//!
//! This module is compiled only in test builds and provides common
//! constructors used across unit test modules throughout `tracemesh-core`.
#![allow(clippy::expect_used)]

use crate::mesh::{Mesh, NodeId};
use crate::options::OptionAssignment;
use crate::trace::{AccessKind, TraceEntry};

/// Builds an assignment from `(name, value)` pairs.
pub fn assign(pairs: &[(&str, u64)]) -> OptionAssignment {
    pairs
        .iter()
        .map(|&(k, v)| (k.to_owned(), v))
        .collect()
}

/// Builds a trace entry with the given shape and an IP of 1.
pub fn entry(kind: AccessKind, is_read: bool, address: u64, value: u64, size: u32) -> TraceEntry {
    TraceEntry {
        ip: 1,
        kind,
        is_read,
        address,
        value,
        access_size: size,
    }
}

/// An 8-bit IO write with a distinguishing value, for structural tests
/// where only content identity matters.
pub fn io_write(value: u64) -> TraceEntry {
    entry(AccessKind::Io, false, 0x80, value, 8)
}

/// Creates a regular node with an explicit content hash and appends it to
/// the tail of the mesh's first path.
pub fn append_hash_node(mesh: &mut Mesh, hash: &str) -> NodeId {
    let id = mesh.create_node(false);
    set_hash(mesh, id, hash);
    mesh.append_node(id);
    id
}

/// Creates a regular node with an explicit content hash and links it as a
/// successor of `after`.
pub fn insert_hash_node(mesh: &mut Mesh, after: NodeId, hash: &str) -> NodeId {
    let id = mesh.create_node(false);
    set_hash(mesh, id, hash);
    mesh.insert_node(after, id);
    id
}

/// Overwrites a node's content hash (test meshes are often built from bare
/// hashes rather than real entries).
pub fn set_hash(mesh: &mut Mesh, id: NodeId, hash: &str) {
    let node = mesh.node_mut(id).expect("node exists");
    node.hash = hash.to_owned();
}

/// Overwrites a node's option-set.
pub fn set_options(mesh: &mut Mesh, id: NodeId, options: Vec<OptionAssignment>) {
    let node = mesh.node_mut(id).expect("node exists");
    node.options = options;
}

/// Builds a linear mesh `start → h₁ → … → hₙ` from bare hashes.
pub fn hash_chain(hashes: &[&str]) -> Mesh {
    let mut mesh = Mesh::new();
    for h in hashes {
        append_hash_node(&mut mesh, h);
    }
    mesh
}
