#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod dot;
pub mod ir;
pub mod mesh;
pub mod options;
pub mod trace;

#[cfg(test)]
mod test_helpers;

pub use dot::to_dot;
pub use ir::{CEmission, EmitWarning, Op, Primitive, ReadModifyWrite, emit_c, lower_entry};
pub use mesh::merge::{MergeError, build_branch};
pub use mesh::{Mesh, MeshNode, NodeId, NodePayload};
pub use options::{OptionAssignment, OptionDomains};
pub use trace::{
    AccessKind, ParseError, TRACE_PREFIX, TraceEntry, parse_trace_line, parse_trace_text,
};

/// Returns the current version of the tracemesh-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
