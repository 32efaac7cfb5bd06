//! YAML configuration for acquisition, framing, options, and storage.
//!
//! The configuration file (`config.yml` by default) describes everything
//! outside the reconstruction engine: how to reach the device under test,
//! which bus accesses frame the interesting region of a trace, how firmware
//! options are laid out in the options default table, and where the SQLite
//! database lives.
//!
//! All keys are optional; absent sections deserialize to empty defaults and
//! are validated at the point of use.
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracemesh_core::{AccessKind, OptionDomains, TraceEntry};

/// Errors produced while loading the configuration file.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io {
        /// The configuration path.
        path: PathBuf,
        /// The underlying I/O error message.
        detail: String,
    },
    /// The file is not valid YAML for the expected schema.
    Yaml {
        /// The configuration path.
        path: PathBuf,
        /// The deserialization error message.
        detail: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, detail } => {
                write!(f, "failed to read config {}: {detail}", path.display())
            }
            ConfigError::Yaml { path, detail } => {
                write!(f, "invalid config {}: {detail}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Acquisition and option-layout settings.
    pub tracelog: TraceLogConfig,
    /// Persistence settings.
    pub database: DatabaseConfig,
}

/// Acquisition and option-layout settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TraceLogConfig {
    /// The bus access that opens the retained trace region.
    pub startsignal: SignalConfig,
    /// The bus access that closes the retained trace region.
    pub stopsignal: SignalConfig,
    /// Serial/FIFO transport settings.
    pub serial: SerialConfig,
    /// Shell commands controlling the device under test.
    pub dutcontrol: DutControlConfig,
    /// The variable firmware options and their blob layout.
    pub variable_options: Vec<VariableOption>,
    /// Name of the options default table (platform name in the store).
    pub options_default_table: String,
}

/// One framing signal: a bus access that delimits the trace region.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Access kind tag (`m`/`i`/`s`/`c`/`p`); empty disables the signal.
    #[serde(rename = "type")]
    pub kind: String,
    /// The accessed address.
    pub offset: u64,
    /// The accessed value.
    pub value: u64,
    /// Direction tag (`I` or `O`).
    pub direction: String,
    /// Access width in bits.
    pub datawidth: u32,
}

impl SignalConfig {
    /// `true` when the signal is present in the configuration.
    pub fn is_configured(&self) -> bool {
        !self.kind.is_empty()
    }

    /// `true` when `entry` is exactly the configured access.
    pub fn matches(&self, entry: &TraceEntry) -> bool {
        AccessKind::from_tag(&self.kind).is_some_and(|kind| {
            entry.kind == kind
                && entry.is_read == (self.direction == "I")
                && entry.address == self.offset
                && entry.value == self.value
                && entry.access_size == self.datawidth
        })
    }
}

/// Serial/FIFO transport settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Transport flavor: `"fifo"` (a `.in`/`.out` pair) or `"tty"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Device path, or FIFO base path without the `.in`/`.out` suffix.
    pub port: String,
    /// Line rate for tty transports; the device is expected to be
    /// configured externally, this value is informational.
    pub baudrate: u32,
    /// Per-byte read/write timeout in seconds.
    pub timeout: u64,
    /// How long to wait for the device node to appear, in seconds.
    pub hotplugtimeout: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            kind: String::new(),
            port: String::new(),
            baudrate: 115_200,
            timeout: 5,
            hotplugtimeout: 5,
        }
    }
}

/// Shell commands that bring the device under test into the right state.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DutControlConfig {
    /// Run once when the transport is created.
    pub initcmd: String,
    /// Run before every trace collection.
    pub startcmd: String,
    /// Run after every trace collection.
    pub stopcmd: String,
    /// Run to power-cycle the device (kept for site-specific scripts).
    pub restartcmd: String,
}

/// Layout of one variable firmware option within the options default table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VariableOption {
    /// Option name as it appears in emitted conditions.
    pub name: String,
    /// Byte offset of the option within the blob.
    pub byteoffset: usize,
    /// Width of the option in bits; packed over `ceil(bitwidth/8)`
    /// little-endian bytes.
    pub bitwidth: u32,
    /// Smallest permitted value.
    pub min: u64,
    /// Largest permitted value.
    pub max: u64,
}

/// Persistence settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from("tracemesh.db"),
        }
    }
}

/// Loads the configuration from a YAML file.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read or parsed.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    parse(&text).map_err(|detail| ConfigError::Yaml {
        path: path.to_path_buf(),
        detail,
    })
}

/// Parses configuration YAML from a string.
pub fn parse(text: &str) -> Result<Config, String> {
    serde_yaml::from_str(text).map_err(|e| e.to_string())
}

/// Derives the optimizer's option domains: every option ranges over
/// `min..=max`.
pub fn option_domains(config: &Config) -> OptionDomains {
    let mut domains = OptionDomains::new();
    for opt in &config.tracelog.variable_options {
        domains.declare_range(opt.name.clone(), opt.min, opt.max);
    }
    domains
}
