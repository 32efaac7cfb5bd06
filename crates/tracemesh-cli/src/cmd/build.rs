//! `tracemesh build` — reconstruct the mesh and emit C and/or Dot.
use std::path::Path;

use tracing::{info, warn};

use tracemesh_core::{Mesh, emit_c, to_dot};

use crate::blob::extract_assignment;
use crate::config::{Config, option_domains};
use crate::error::CliError;
use crate::store::Store;

/// Builds the mesh from every successful trace, runs the optimization
/// passes, and writes the requested outputs.
pub fn run(
    store: &Store,
    config: &Config,
    c_out: Option<&Path>,
    dot_out: Option<&Path>,
    full_dot: bool,
) -> Result<(), CliError> {
    let test_ids = store.successful_test_ids()?;
    if test_ids.is_empty() {
        return Err(CliError::NoSuccessfulTraces);
    }

    let options = &config.tracelog.variable_options;
    let mut mesh = Mesh::new();
    for test_id in test_ids {
        let blob = store.test_config(test_id)?;
        let assignment = extract_assignment(&blob, options)?;
        let entries = store.trace_entries(test_id)?;
        info!(test_id, entries = entries.len(), ?assignment, "merging trace");
        mesh.insert_trace(&entries, &assignment)?;
    }

    mesh.merge_duplicate_predecessors();
    mesh.reduce_option_sets(&option_domains(config));
    mesh.factor_common_predecessors();
    info!(
        nodes = mesh.node_count(),
        traces = mesh.merged_traces(),
        "mesh optimized"
    );

    if let Some(path) = c_out {
        let emission = emit_c(&mesh);
        for w in &emission.warnings {
            warn!(%w, "emission anomaly");
        }
        write_output(path, &emission.code)?;
        println!(
            "wrote {} ({} warnings)",
            path.display(),
            emission.warnings.len()
        );
    }

    if let Some(path) = dot_out {
        write_output(path, &to_dot(&mesh, !full_dot))?;
        println!("wrote {}", path.display());
    }

    Ok(())
}

fn write_output(path: &Path, contents: &str) -> Result<(), CliError> {
    std::fs::write(path, contents).map_err(|e| CliError::FileWrite {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}
