//! `tracemesh add-config` — store an options default table.
use std::path::Path;

use tracing::info;

use crate::error::CliError;
use crate::store::Store;

/// Reads the blob at `file` and stores it under `name`.
pub fn run(store: &Store, name: &str, file: &Path) -> Result<(), CliError> {
    let blob = std::fs::read(file).map_err(|e| CliError::FileRead {
        path: file.to_path_buf(),
        detail: e.to_string(),
    })?;
    store.set_default_config(name, &blob)?;
    info!(platform = name, bytes = blob.len(), "stored default config");
    println!("stored default config for platform {name} ({} bytes)", blob.len());
    Ok(())
}
