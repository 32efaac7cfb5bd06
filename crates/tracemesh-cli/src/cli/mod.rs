//! Clap CLI definition: root struct and subcommands.
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Reconstructs firmware initialization control flow from bus traces.
#[derive(Parser)]
#[command(name = "tracemesh", version, about)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, global = true, default_value = "config.yml", value_name = "FILE")]
    pub config: PathBuf,

    /// Verbose logging (default filter becomes `debug`).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// All top-level subcommands exposed by the `tracemesh` binary.
#[derive(Subcommand)]
pub enum Command {
    /// Store an options default table under a platform name.
    AddConfig {
        /// Platform name the blob is stored under.
        #[arg(long)]
        name: String,
        /// Path to the default table blob.
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },

    /// Enumerate option combinations as pending tests.
    GenTests,

    /// Collect the next pending trace from the device under test.
    Collect {
        /// Collect every pending trace instead of just the next one.
        #[arg(long)]
        all: bool,
        /// Serial device for the DUT shell (overrides the config).
        #[arg(long, value_name = "PATH", conflicts_with = "fifo")]
        dev: Option<String>,
        /// Baud rate of the serial device (informational; the line is
        /// configured externally).
        #[arg(long)]
        baud: Option<u32>,
        /// FIFO base path; `.in` and `.out` are appended (overrides the
        /// config).
        #[arg(long, value_name = "PATH")]
        fifo: Option<String>,
    },

    /// Build the mesh from all successful traces and emit C and/or Dot.
    Build {
        /// Write the generated C to this file.
        #[arg(long, value_name = "FILE")]
        c_out: Option<PathBuf>,
        /// Write the mesh as a Graphviz dot file.
        #[arg(long, value_name = "FILE")]
        dot_out: Option<PathBuf>,
        /// Full node labels (trace entry, hash, options) instead of the
        /// compact colored form.
        #[arg(long, requires = "dot_out")]
        full_dot: bool,
    },
}
