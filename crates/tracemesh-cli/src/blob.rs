//! Packing and unpacking firmware options in the options default table.
//!
//! The options default table is an opaque byte blob; each variable option
//! occupies `ceil(bitwidth/8)` little-endian bytes starting at its byte
//! offset. New test cases are generated by enumerating the Cartesian
//! product of every option's `[min, max]` range and patching a copy of the
//! default blob per combination.
use std::fmt;

use tracemesh_core::OptionAssignment;

use crate::config::VariableOption;

/// Errors raised when an option description does not fit the blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    /// The option's bytes fall outside the blob.
    OffsetOutOfRange {
        /// Option name.
        option: String,
        /// Declared byte offset.
        offset: usize,
        /// Blob length in bytes.
        blob_len: usize,
    },
    /// The option is wider than 64 bits.
    WidthTooLarge {
        /// Option name.
        option: String,
        /// Declared width in bits.
        bitwidth: u32,
    },
    /// The option's `max` is below its `min`.
    InvalidRange {
        /// Option name.
        option: String,
    },
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobError::OffsetOutOfRange {
                option,
                offset,
                blob_len,
            } => write!(
                f,
                "option {option}: byte offset {offset} outside blob of {blob_len} bytes"
            ),
            BlobError::WidthTooLarge { option, bitwidth } => {
                write!(f, "option {option}: bit width {bitwidth} exceeds 64")
            }
            BlobError::InvalidRange { option } => {
                write!(f, "option {option}: max is below min")
            }
        }
    }
}

impl std::error::Error for BlobError {}

/// Number of blob bytes an option spans.
fn byte_span(bitwidth: u32) -> usize {
    (bitwidth as usize).div_ceil(8)
}

fn validate(blob_len: usize, opt: &VariableOption) -> Result<(), BlobError> {
    if opt.bitwidth > 64 {
        return Err(BlobError::WidthTooLarge {
            option: opt.name.clone(),
            bitwidth: opt.bitwidth,
        });
    }
    if opt.max < opt.min {
        return Err(BlobError::InvalidRange {
            option: opt.name.clone(),
        });
    }
    let end = opt.byteoffset + byte_span(opt.bitwidth);
    if end > blob_len {
        return Err(BlobError::OffsetOutOfRange {
            option: opt.name.clone(),
            offset: opt.byteoffset,
            blob_len,
        });
    }
    Ok(())
}

/// Writes `value` into `blob` at the option's little-endian byte positions.
pub fn patch_option(blob: &mut [u8], opt: &VariableOption, value: u64) -> Result<(), BlobError> {
    validate(blob.len(), opt)?;
    for i in 0..byte_span(opt.bitwidth) {
        blob[opt.byteoffset + i] = (value >> (i * 8)) as u8;
    }
    Ok(())
}

/// Reads the option's value back from `blob`.
pub fn extract_option(blob: &[u8], opt: &VariableOption) -> Result<u64, BlobError> {
    validate(blob.len(), opt)?;
    let mut value = 0u64;
    for i in 0..byte_span(opt.bitwidth) {
        value |= u64::from(blob[opt.byteoffset + i]) << (i * 8);
    }
    Ok(value)
}

/// Reads every option's value from a test's config blob.
pub fn extract_assignment(
    blob: &[u8],
    opts: &[VariableOption],
) -> Result<OptionAssignment, BlobError> {
    let mut assignment = OptionAssignment::new();
    for opt in opts {
        assignment.set(opt.name.clone(), extract_option(blob, opt)?);
    }
    Ok(assignment)
}

/// Enumerates the Cartesian product of every option's `[min, max]` range.
///
/// Returns one `(assignment, patched blob)` pair per combination, in
/// odometer order with the last declared option varying fastest. A
/// configuration without variable options yields the default blob alone.
pub fn enumerate_assignments(
    defaults: &[u8],
    opts: &[VariableOption],
) -> Result<Vec<(OptionAssignment, Vec<u8>)>, BlobError> {
    for opt in opts {
        validate(defaults.len(), opt)?;
    }

    let mut out = Vec::new();
    let mut current = OptionAssignment::new();
    let mut blob = defaults.to_vec();
    enumerate_level(opts, 0, &mut current, &mut blob, &mut out)?;
    Ok(out)
}

fn enumerate_level(
    opts: &[VariableOption],
    level: usize,
    current: &mut OptionAssignment,
    blob: &mut Vec<u8>,
    out: &mut Vec<(OptionAssignment, Vec<u8>)>,
) -> Result<(), BlobError> {
    let Some(opt) = opts.get(level) else {
        out.push((current.clone(), blob.clone()));
        return Ok(());
    };
    for value in opt.min..=opt.max {
        patch_option(blob, opt, value)?;
        current.set(opt.name.clone(), value);
        enumerate_level(opts, level + 1, current, blob, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;

    fn opt(name: &str, byteoffset: usize, bitwidth: u32, min: u64, max: u64) -> VariableOption {
        VariableOption {
            name: name.to_owned(),
            byteoffset,
            bitwidth,
            min,
            max,
        }
    }

    #[test]
    fn patch_and_extract_roundtrip() {
        let o = opt("OPT1", 2, 16, 0, 0xffff);
        let mut blob = vec![0u8; 8];
        patch_option(&mut blob, &o, 0xabcd).expect("patch");
        assert_eq!(blob, [0, 0, 0xcd, 0xab, 0, 0, 0, 0]);
        assert_eq!(extract_option(&blob, &o).expect("extract"), 0xabcd);
    }

    #[test]
    fn sub_byte_widths_occupy_one_byte() {
        let o = opt("OPT1", 0, 3, 0, 7);
        let mut blob = vec![0xffu8; 2];
        patch_option(&mut blob, &o, 5).expect("patch");
        assert_eq!(blob, [5, 0xff]);
    }

    #[test]
    fn out_of_range_offset_is_rejected() {
        let o = opt("OPT1", 7, 16, 0, 1);
        let mut blob = vec![0u8; 8];
        assert_eq!(
            patch_option(&mut blob, &o, 1),
            Err(BlobError::OffsetOutOfRange {
                option: "OPT1".to_owned(),
                offset: 7,
                blob_len: 8,
            })
        );
    }

    #[test]
    fn oversized_widths_are_rejected() {
        let o = opt("OPT1", 0, 65, 0, 1);
        assert!(matches!(
            extract_option(&[0u8; 16], &o),
            Err(BlobError::WidthTooLarge { .. })
        ));
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let o = opt("OPT1", 0, 8, 3, 1);
        assert!(matches!(
            extract_option(&[0u8; 4], &o),
            Err(BlobError::InvalidRange { .. })
        ));
    }

    #[test]
    fn extract_assignment_reads_every_option() {
        let opts = [opt("OPT1", 0, 8, 0, 3), opt("OPT2", 1, 8, 0, 9)];
        let blob = [2u8, 7u8];
        let a = extract_assignment(&blob, &opts).expect("extract");
        assert_eq!(a.get("OPT1"), Some(2));
        assert_eq!(a.get("OPT2"), Some(7));
    }

    #[test]
    fn enumeration_covers_the_cartesian_product() {
        let opts = [opt("OPT1", 0, 8, 0, 1), opt("OPT2", 1, 8, 1, 3)];
        let combos = enumerate_assignments(&[0u8; 2], &opts).expect("enumerate");
        assert_eq!(combos.len(), 6);

        // last option varies fastest
        let values: Vec<(u64, u64)> = combos
            .iter()
            .map(|(a, _)| {
                (
                    a.get("OPT1").expect("OPT1"),
                    a.get("OPT2").expect("OPT2"),
                )
            })
            .collect();
        assert_eq!(
            values,
            [(0, 1), (0, 2), (0, 3), (1, 1), (1, 2), (1, 3)]
        );

        // blobs are patched accordingly
        for (a, blob) in &combos {
            assert_eq!(u64::from(blob[0]), a.get("OPT1").expect("OPT1"));
            assert_eq!(u64::from(blob[1]), a.get("OPT2").expect("OPT2"));
        }
    }

    #[test]
    fn enumeration_without_options_yields_the_default_blob() {
        let combos = enumerate_assignments(&[9u8, 9u8], &[]).expect("enumerate");
        assert_eq!(combos.len(), 1);
        assert_eq!(combos[0].1, vec![9u8, 9u8]);
        assert!(combos[0].0.is_empty());
    }
}
