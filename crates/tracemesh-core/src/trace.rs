//! The trace entry model and the wire-format parser.
//!
//! One [`TraceEntry`] describes a single observed firmware bus operation —
//! a memory, IO-port, MSR, CPUID, or PCI-config access. Entries arrive as
//! whitespace-delimited ASCII lines prefixed with `#B!`:
//!
//! ```text
//! #B! <ip:hex> <kind:m|i|s|c|p> <dir:I|O> <addr:hex> <value:hex> [<value_hi:hex>|<width:dec>]
//! ```
//!
//! The sixth field is the upper 32 bits of the value for MSR accesses, the
//! access width in bits for memory/IO/PCI accesses, and absent for CPUID.
//!
//! Entry identity is content-based: two entries with the same six fields are
//! the same operation and share a [`TraceEntry::content_hash`].
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The line prefix marking a trace entry on the wire.
pub const TRACE_PREFIX: &str = "#B!";

/// The kind of bus access an entry records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    /// 32-bit memory-mapped access.
    #[default]
    Mem32,
    /// IO port access.
    Io,
    /// Model-specific register access.
    Msr,
    /// CPUID leaf read.
    Cpuid,
    /// PCI configuration-space access.
    Pci,
}

impl AccessKind {
    /// The single-letter wire tag for this kind.
    pub fn tag(self) -> char {
        match self {
            AccessKind::Mem32 => 'm',
            AccessKind::Io => 'i',
            AccessKind::Msr => 's',
            AccessKind::Cpuid => 'c',
            AccessKind::Pci => 'p',
        }
    }

    /// Parses a wire tag back into a kind.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "m" => Some(AccessKind::Mem32),
            "i" => Some(AccessKind::Io),
            "s" => Some(AccessKind::Msr),
            "c" => Some(AccessKind::Cpuid),
            "p" => Some(AccessKind::Pci),
            _ => None,
        }
    }

    /// Stable integer code used by the persistence layer.
    pub fn code(self) -> u8 {
        match self {
            AccessKind::Mem32 => 0,
            AccessKind::Io => 1,
            AccessKind::Msr => 2,
            AccessKind::Cpuid => 3,
            AccessKind::Pci => 4,
        }
    }

    /// Inverse of [`AccessKind::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AccessKind::Mem32),
            1 => Some(AccessKind::Io),
            2 => Some(AccessKind::Msr),
            3 => Some(AccessKind::Cpuid),
            4 => Some(AccessKind::Pci),
            _ => None,
        }
    }
}

/// A single observed bus operation.
///
/// Equality and hashing are content-based over all six fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Instruction pointer at which the access was executed.
    pub ip: u64,
    /// The kind of access.
    pub kind: AccessKind,
    /// `true` for a read (wire direction `I`), `false` for a write (`O`).
    pub is_read: bool,
    /// The accessed address (MSR number / CPUID leaf for those kinds).
    pub address: u64,
    /// The value read or written. For MSR the full 64 bits.
    pub value: u64,
    /// Access width in bits (8, 16, 32, 64); 0 for kinds without a width.
    pub access_size: u32,
}

impl TraceEntry {
    /// Returns the lowercase-hex SHA-256 of a canonical encoding of all six
    /// fields. Entries with identical content share a hash.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update([self.kind.code(), u8::from(self.is_read)]);
        hasher.update(self.ip.to_le_bytes());
        hasher.update(self.address.to_le_bytes());
        hasher.update(self.value.to_le_bytes());
        hasher.update(self.access_size.to_le_bytes());
        hex_encode(&hasher.finalize())
    }
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.is_read { "in" } else { "out" };
        write!(
            f,
            "IP: {:08x}, Type: {}, Dir: {}, Addr: {:08x}, Value: {:016x}, Access: {}",
            self.ip,
            self.kind.tag(),
            dir,
            self.address,
            self.value,
            self.access_size
        )
    }
}

/// Encodes a byte slice as a lowercase hexadecimal string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX_CHARS[(b >> 4) as usize] as char);
        out.push(HEX_CHARS[(b & 0x0f) as usize] as char);
    }
    out
}

/// Errors produced when a trace line does not match the wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line does not begin with the `#B!` prefix.
    MissingPrefix,
    /// A required field is absent.
    ///
    /// The contained string names the field (`"ip"`, `"kind"`,
    /// `"direction"`, `"address"`, `"value"`, `"value_hi"`,
    /// `"access_size"`).
    MissingField(&'static str),
    /// The kind tag is not one of `m`, `i`, `s`, `c`, `p`.
    UnknownKind(String),
    /// The direction tag is not `I` or `O`.
    UnknownDirection(String),
    /// A numeric field failed to parse.
    InvalidNumber {
        /// The field that failed to parse.
        field: &'static str,
        /// The offending token.
        token: String,
    },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingPrefix => {
                write!(f, "line does not start with trace prefix {TRACE_PREFIX:?}")
            }
            ParseError::MissingField(field) => write!(f, "line is missing the {field} field"),
            ParseError::UnknownKind(token) => write!(f, "unknown access kind {token:?}"),
            ParseError::UnknownDirection(token) => write!(f, "unknown direction {token:?}"),
            ParseError::InvalidNumber { field, token } => {
                write!(f, "invalid number {token:?} in {field} field")
            }
        }
    }
}

impl std::error::Error for ParseError {}

fn parse_hex(field: &'static str, token: &str) -> Result<u64, ParseError> {
    u64::from_str_radix(token, 16).map_err(|_| ParseError::InvalidNumber {
        field,
        token: token.to_owned(),
    })
}

/// Parses one trace line into a [`TraceEntry`].
///
/// # Errors
///
/// Returns a [`ParseError`] naming the first missing or malformed field.
pub fn parse_trace_line(line: &str) -> Result<TraceEntry, ParseError> {
    let mut parts = line.split_whitespace();

    if parts.next() != Some(TRACE_PREFIX) {
        return Err(ParseError::MissingPrefix);
    }

    let ip = parse_hex("ip", parts.next().ok_or(ParseError::MissingField("ip"))?)?;

    let kind_token = parts.next().ok_or(ParseError::MissingField("kind"))?;
    let kind = AccessKind::from_tag(kind_token)
        .ok_or_else(|| ParseError::UnknownKind(kind_token.to_owned()))?;

    let dir_token = parts.next().ok_or(ParseError::MissingField("direction"))?;
    let is_read = match dir_token {
        "I" => true,
        "O" => false,
        other => return Err(ParseError::UnknownDirection(other.to_owned())),
    };

    let address = parse_hex(
        "address",
        parts.next().ok_or(ParseError::MissingField("address"))?,
    )?;

    let mut value = parse_hex(
        "value",
        parts.next().ok_or(ParseError::MissingField("value"))?,
    )?;

    let mut access_size = 0u32;
    match kind {
        AccessKind::Msr => {
            let hi = parse_hex(
                "value_hi",
                parts.next().ok_or(ParseError::MissingField("value_hi"))?,
            )?;
            value |= hi << 32;
        }
        AccessKind::Mem32 | AccessKind::Io | AccessKind::Pci => {
            let token = parts
                .next()
                .ok_or(ParseError::MissingField("access_size"))?;
            access_size = token.parse().map_err(|_| ParseError::InvalidNumber {
                field: "access_size",
                token: token.to_owned(),
            })?;
        }
        AccessKind::Cpuid => {}
    }

    Ok(TraceEntry {
        ip,
        kind,
        is_read,
        address,
        value,
        access_size,
    })
}

/// Parses a whole trace log.
///
/// Lines without the `#B!` prefix are ignored (the acquisition channel is
/// shared with console output). Prefixed but malformed lines are reported in
/// the second return value as `(1-based line number, error)` pairs and
/// otherwise skipped.
pub fn parse_trace_text(text: &str) -> (Vec<TraceEntry>, Vec<(usize, ParseError)>) {
    let mut entries = Vec::new();
    let mut errors = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if !line.trim_start().starts_with(TRACE_PREFIX) {
            continue;
        }
        match parse_trace_line(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => errors.push((idx + 1, e)),
        }
    }
    (entries, errors)
}
