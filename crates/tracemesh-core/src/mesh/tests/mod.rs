//! Unit tests for the mesh: path enumeration, merging, and optimization.
#![allow(clippy::expect_used)]


use std::collections::BTreeSet;

use super::{Mesh, NodeId};

/// Asserts edge reciprocity: `b ∈ a.next` ⇔ `a ∈ b.prev`, for every node.
pub fn assert_edges_reciprocal(mesh: &Mesh) {
    let all = || {
        mesh.node(mesh.start())
            .into_iter()
            .chain(mesh.nodes())
    };
    for node in all() {
        for &s in node.successors() {
            let succ = mesh.node(s).expect("successor exists");
            assert!(
                succ.predecessors().contains(&node.id),
                "edge {} -> {s} lacks the reciprocal predecessor entry",
                node.id
            );
        }
        for &p in node.predecessors() {
            let pred = mesh.node(p).expect("predecessor exists");
            assert!(
                pred.successors().contains(&node.id),
                "edge {p} -> {} lacks the successor entry",
                node.id
            );
        }
    }
}

/// Asserts that every live node is reachable from the start node.
pub fn assert_start_reachability(mesh: &Mesh) {
    let mut seen: BTreeSet<NodeId> = BTreeSet::new();
    let mut stack = vec![mesh.start()];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        let node = mesh.node(id).expect("reached node exists");
        stack.extend(node.successors().iter().copied());
    }
    for node in mesh.nodes() {
        assert!(
            seen.contains(&node.id),
            "node {} is unreachable from start",
            node.id
        );
    }
}

/// Asserts that no node has two successors with the same content hash.
pub fn assert_distinct_successor_hashes(mesh: &Mesh) {
    let all = || {
        mesh.node(mesh.start())
            .into_iter()
            .chain(mesh.nodes())
    };
    for node in all() {
        let hashes: BTreeSet<&str> = node
            .successors()
            .iter()
            .map(|&s| mesh.hash_of(s).expect("successor exists"))
            .collect();
        assert_eq!(
            hashes.len(),
            node.successors().len(),
            "node {} has successors with duplicate hashes",
            node.id
        );
    }
}

/// The multiset-free view of a mesh used for structural comparison: for
/// every live node, its hash and the hashes of its successors.
pub fn shape(mesh: &Mesh) -> Vec<(NodeId, String, BTreeSet<NodeId>)> {
    mesh.node(mesh.start())
        .into_iter()
        .chain(mesh.nodes())
        .map(|n| {
            (
                n.id,
                n.hash.clone(),
                n.successors().iter().copied().collect(),
            )
        })
        .collect()
}
