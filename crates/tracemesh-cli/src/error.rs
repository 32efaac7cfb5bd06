/// CLI error types with associated exit codes.
///
/// [`CliError`] is the top-level error type for the `tracemesh` binary.
/// Every variant maps to a stable exit code via [`CliError::exit_code`]:
///
/// - Exit code **2** — input failure: the configuration or an input file
///   could not be read or parsed. These errors terminate before any domain
///   logic runs.
/// - Exit code **1** — logical failure: the tool ran but the operation is a
///   well-defined failure (store error, acquisition failure, merge
///   invariant violation, nothing to build).
use std::fmt;
use std::path::PathBuf;

use tracemesh_core::MergeError;

use crate::config::ConfigError;
use crate::store::StoreError;
use crate::transport::AcquisitionError;

/// All error conditions the `tracemesh` CLI can produce.
///
/// Use [`CliError::exit_code`] for the process exit code and
/// [`CliError::message`] for the human-readable string printed to stderr.
#[derive(Debug)]
pub enum CliError {
    // --- Exit code 2: input failures ---
    /// The YAML configuration could not be read or parsed.
    Config(ConfigError),

    /// An input file could not be read.
    FileRead {
        /// The path that could not be read.
        path: PathBuf,
        /// The underlying I/O error message.
        detail: String,
    },

    /// An output file could not be written.
    FileWrite {
        /// The path that could not be written.
        path: PathBuf,
        /// The underlying I/O error message.
        detail: String,
    },

    /// An option description in the configuration does not fit the blob.
    Blob(crate::blob::BlobError),

    // --- Exit code 1: logical failures ---
    /// The persistence layer failed.
    Store(StoreError),

    /// Trace acquisition failed.
    Acquisition(AcquisitionError),

    /// The merger hit an invariant violation; the build was aborted.
    Merge(MergeError),

    /// `build` was requested but no successful trace exists in the store.
    NoSuccessfulTraces,
}

impl CliError {
    /// Returns the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::FileRead { .. } | Self::FileWrite { .. } | Self::Blob(_) => 2,
            Self::Store(_) | Self::Acquisition(_) | Self::Merge(_) | Self::NoSuccessfulTraces => 1,
        }
    }

    /// Returns a human-readable error message suitable for stderr.
    pub fn message(&self) -> String {
        match self {
            Self::Config(e) => format!("error: {e}"),
            Self::FileRead { path, detail } => {
                format!("error: failed to read {}: {detail}", path.display())
            }
            Self::FileWrite { path, detail } => {
                format!("error: failed to write {}: {detail}", path.display())
            }
            Self::Blob(e) => format!("error: {e}"),
            Self::Store(e) => format!("error: store: {e}"),
            Self::Acquisition(e) => format!("error: acquisition: {e}"),
            Self::Merge(e) => format!("error: merge aborted: {e}"),
            Self::NoSuccessfulTraces => {
                "error: no successful traces in the database, nothing to build".to_owned()
            }
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<AcquisitionError> for CliError {
    fn from(e: AcquisitionError) -> Self {
        Self::Acquisition(e)
    }
}

impl From<MergeError> for CliError {
    fn from(e: MergeError) -> Self {
        Self::Merge(e)
    }
}

impl From<crate::blob::BlobError> for CliError {
    fn from(e: crate::blob::BlobError) -> Self {
        Self::Blob(e)
    }
}
