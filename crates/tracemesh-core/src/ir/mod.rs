//! Lowering mesh nodes to a small C-oriented IR and emitting structured C.
//!
//! Every regular mesh node lowers to one primitive [`Op`] — a read or a
//! write of one of the five access kinds. The emitter walks the mesh from
//! the start node to the tail of the likeliest path, producing straight-line
//! statements for linear runs and `if` / `else if` / `else` blocks at
//! branching nodes, guarded by the option-sets on the outgoing edges.
//!
//! Anomalies during emission (a branch that never reconverges, a branch
//! with no conditional successor) are collected as [`EmitWarning`]s and
//! logged; emission continues and the output stays brace-balanced.
mod to_c;

#[cfg(test)]
mod tests;

use std::fmt;

use tracing::warn;

use crate::mesh::{Mesh, MeshNode, NodeId};
use crate::trace::{AccessKind, TraceEntry};

/// A primitive read or write access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Primitive {
    /// The access kind.
    pub kind: AccessKind,
    /// The accessed address.
    pub address: u64,
    /// The value read or written.
    pub value: u64,
    /// Access width in bits.
    pub access_size: u32,
}

/// A read-modify-write access: clear `and_mask` bits, set `or_mask` bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadModifyWrite {
    /// The access kind.
    pub kind: AccessKind,
    /// The accessed address.
    pub address: u64,
    /// Bits to set.
    pub or_mask: u64,
    /// Bits to clear.
    pub and_mask: u64,
    /// Access width in bits.
    pub access_size: u32,
}

/// One IR operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    /// A primitive read.
    Read(Primitive),
    /// A primitive write.
    Write(Primitive),
    /// A fused read-modify-write.
    ReadModifyWrite(ReadModifyWrite),
}

/// Lowers a trace entry to its IR operation.
pub fn lower_entry(entry: &TraceEntry) -> Op {
    let p = Primitive {
        kind: entry.kind,
        address: entry.address,
        value: entry.value,
        access_size: entry.access_size,
    };
    if entry.is_read { Op::Read(p) } else { Op::Write(p) }
}

/// Non-fatal anomalies found while emitting C.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitWarning {
    /// A branching node whose branches never reconverge; emission stopped
    /// at the branch.
    NoMergePoint {
        /// The branching node.
        at: NodeId,
    },
    /// A branching node none of whose successors carries a condition; only
    /// the first successor's subtree was emitted.
    NoConditionalSuccessor {
        /// The branching node.
        at: NodeId,
    },
}

impl fmt::Display for EmitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmitWarning::NoMergePoint { at } => {
                write!(f, "branches at node {at} have no common merge point")
            }
            EmitWarning::NoConditionalSuccessor { at } => {
                write!(f, "branch at node {at} has no conditional successor")
            }
        }
    }
}

/// The result of emitting a mesh as C.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CEmission {
    /// The emitted C statements. Always brace-balanced, possibly incomplete
    /// when warnings were raised.
    pub code: String,
    /// Anomalies encountered during the walk.
    pub warnings: Vec<EmitWarning>,
}

/// Emits the mesh as structured C.
///
/// The walk covers the half-open range from the start node to the tail of
/// the likeliest path; no-op nodes emit nothing, branch blocks are guarded
/// by the successors' option-sets rendered as disjunctions of equality
/// conjunctions.
pub fn emit_c(mesh: &Mesh) -> CEmission {
    let mut out = String::new();
    let mut warnings = Vec::new();
    let last = mesh.last_node();
    emit_range(mesh, 0, mesh.start(), last, &mut out, &mut warnings);
    CEmission {
        code: out,
        warnings,
    }
}

/// Emits the nodes from `start` (inclusive) to `end` (exclusive),
/// recursing one level per branch block.
fn emit_range(
    mesh: &Mesh,
    indent: usize,
    start: NodeId,
    end: NodeId,
    out: &mut String,
    warnings: &mut Vec<EmitWarning>,
) {
    let ws = "  ".repeat(indent);
    let mut cur = start;
    loop {
        let Some(node) = mesh.node(cur) else { return };

        if let Some(entry) = node.entry() {
            out.push_str(&ws);
            out.push_str(&lower_entry(entry).to_c());
        }

        let succs = node.successors();
        match succs.len() {
            0 => return,
            1 => cur = succs[0],
            _ => {
                let Some(merge_point) = mesh.common_merge_point(cur) else {
                    let w = EmitWarning::NoMergePoint { at: cur };
                    warn!(%w, "incomplete mesh");
                    warnings.push(w);
                    return;
                };

                let head = succs
                    .iter()
                    .copied()
                    .find(|&s| mesh.node(s).is_some_and(MeshNode::has_condition));

                let Some(head) = head else {
                    let w = EmitWarning::NoConditionalSuccessor { at: cur };
                    warn!(%w, "unguarded branch");
                    warnings.push(w);
                    cur = succs[0];
                    if cur == end {
                        return;
                    }
                    continue;
                };

                let succs: Vec<NodeId> = succs.to_vec();

                out.push_str(&ws);
                out.push_str("if (");
                out.push_str(&render_condition(mesh, head, &ws));
                out.push_str(") {\n");
                emit_range(mesh, indent + 1, head, merge_point, out, warnings);
                out.push_str(&ws);
                out.push_str("}\n");

                for s in succs {
                    if s == head {
                        continue;
                    }
                    let conditional = mesh.node(s).is_some_and(MeshNode::has_condition);
                    out.push_str(&ws);
                    if conditional {
                        out.push_str("else if (");
                        out.push_str(&render_condition(mesh, s, &ws));
                        out.push_str(") {\n");
                    } else {
                        out.push_str("else {\n");
                    }
                    emit_range(mesh, indent + 1, s, merge_point, out, warnings);
                    out.push_str(&ws);
                    out.push_str("}\n");
                }

                cur = merge_point;
            }
        }

        if cur == end {
            return;
        }
    }
}

/// Renders a successor's option-set as a branch condition: each assignment
/// becomes a parenthesized conjunction of `name == value` terms (values in
/// decimal), assignments join with `||` broken over lines aligned four
/// columns past the current indent. Empty assignments mark the branch
/// unconditional and are not rendered.
fn render_condition(mesh: &Mesh, id: NodeId, ws: &str) -> String {
    let Some(node) = mesh.node(id) else {
        return String::new();
    };
    let parts: Vec<String> = node
        .options
        .iter()
        .filter(|a| !a.is_empty())
        .map(|a| {
            let conj: Vec<String> = a.iter().map(|(k, v)| format!("{k} == {v}")).collect();
            format!("({})", conj.join(" && "))
        })
        .collect();
    parts.join(&format!(" ||\n{ws}    "))
}
