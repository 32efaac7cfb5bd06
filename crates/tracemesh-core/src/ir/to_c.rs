//! Exact C renderings of the IR operations.
//!
//! Addresses are zero-padded to 8 hex digits (4 for IO ports), values to
//! the width implied by the access kind. The MSR-write rendering assigns
//! `.lo` from the upper half and `.hi` from the lower half; downstream
//! consumers depend on exactly this output, so it must not be "corrected".
use super::{Op, Primitive, ReadModifyWrite};
use crate::trace::AccessKind;

/// The `b`/`w`/`l` suffix of the IO port helpers for a width in bits.
fn io_suffix(access_size: u32) -> &'static str {
    match access_size {
        8 => "b",
        16 => "w",
        32 => "l",
        _ => "",
    }
}

/// Splits a PCI config address into (bus, device, function, offset).
fn pci_decode(address: u64) -> (u64, u64, u64, u64) {
    (
        (address >> 20) & 0xff,
        (address >> 15) & 0x1f,
        (address >> 12) & 0x7,
        address & 0xfff,
    )
}

impl Op {
    /// Renders this operation as one C statement (or block), newline
    /// terminated.
    pub fn to_c(&self) -> String {
        match self {
            Op::Read(p) => p.read_to_c(),
            Op::Write(p) => p.write_to_c(),
            Op::ReadModifyWrite(rmw) => rmw.to_c(),
        }
    }
}

impl Primitive {
    fn read_to_c(&self) -> String {
        match self.kind {
            AccessKind::Mem32 => format!(
                "read{}((void *)0x{:08x}); // 0x{:08x}\n",
                self.access_size, self.address, self.value
            ),
            AccessKind::Io => format!(
                "in{}(0x{:04x}); // 0x{:08x}\n",
                io_suffix(self.access_size),
                self.address,
                self.value
            ),
            AccessKind::Msr => {
                format!("rdmsr(0x{:08x}); // 0x{:016x}\n", self.address, self.value)
            }
            AccessKind::Cpuid => {
                format!("cpuid(0x{:08x}); // 0x{:016x}\n", self.address, self.value)
            }
            AccessKind::Pci => {
                let (b, d, f, o) = pci_decode(self.address);
                format!(
                    "pci_read_config{}(PCI_DEV(0x{:x}, 0x{:x}, 0x{:x}), 0x{:04x}); // 0x{:08x}\n",
                    self.access_size, b, d, f, o, self.value
                )
            }
        }
    }

    fn write_to_c(&self) -> String {
        match self.kind {
            AccessKind::Mem32 => format!(
                "write{}((void *)0x{:08x}, 0x{:08x});\n",
                self.access_size, self.address, self.value
            ),
            AccessKind::Io => format!(
                "out{}(0x{:x}, 0x{:04x});\n",
                io_suffix(self.access_size),
                self.value,
                self.address
            ),
            AccessKind::Msr => format!(
                "{{\n\tmsr_t msr = {{.lo = 0x{:08x}, .hi = 0x{:08x}}};\n\twrmsr(0x{:08x}, msr);\n}}\n",
                self.value >> 32,
                self.value & 0xffff_ffff,
                self.address
            ),
            AccessKind::Cpuid => String::new(),
            AccessKind::Pci => {
                let (b, d, f, o) = pci_decode(self.address);
                format!(
                    "pci_write_config{}(PCI_DEV(0x{:x}, 0x{:x}, 0x{:x}), 0x{:04x}, 0x{:08x});\n",
                    self.access_size, b, d, f, o, self.value
                )
            }
        }
    }
}

impl ReadModifyWrite {
    fn to_c(&self) -> String {
        let mut out = String::from("{\n");
        match self.kind {
            AccessKind::Mem32 => {
                out.push_str(&format!(
                    "uint{}_t tmp = read{}((void *)0x{:08x});\n",
                    self.access_size, self.access_size, self.address
                ));
                out.push_str(&format!("tmp &= ~0x{:08x};\n", self.and_mask));
                out.push_str(&format!("tmp |= 0x{:08x};\n", self.or_mask));
                out.push_str(&format!(
                    "write{}((void *)0x{:08x}, tmp);\n",
                    self.access_size, self.address
                ));
            }
            AccessKind::Io => {
                out.push_str(&format!(
                    "uint{}_t tmp = in{}(0x{:04x});\n",
                    self.access_size,
                    io_suffix(self.access_size),
                    self.address
                ));
                out.push_str(&format!("tmp &= ~0x{:08x};\n", self.and_mask));
                out.push_str(&format!("tmp |= 0x{:08x};\n", self.or_mask));
                out.push_str(&format!(
                    "out{}(tmp, 0x{:04x});\n",
                    io_suffix(self.access_size),
                    self.address
                ));
            }
            AccessKind::Msr => {
                out.push_str("msr_t msr;\n");
                out.push_str(&format!("msr = rdmsr(0x{:08x});\n", self.address));
                out.push_str(&format!(
                    "msr.lo &= ~0x{:08x};\n",
                    self.and_mask & 0xffff_ffff
                ));
                out.push_str(&format!("msr.hi &= ~0x{:08x};\n", self.and_mask >> 32));
                out.push_str(&format!(
                    "msr.lo |=  0x{:08x};\n",
                    self.or_mask & 0xffff_ffff
                ));
                out.push_str(&format!("msr.hi |=  0x{:08x};\n", self.or_mask >> 32));
                out.push_str(&format!("wrmsr(0x{:08x}, msr);\n", self.address));
            }
            AccessKind::Cpuid => {}
            AccessKind::Pci => {
                let (b, d, f, o) = pci_decode(self.address);
                out.push_str(&format!(
                    "uint{}_t tmp = pci_read_config{}(PCI_DEV(0x{:x}, 0x{:x}, 0x{:x}), 0x{:04x});\n",
                    self.access_size, self.access_size, b, d, f, o
                ));
                out.push_str(&format!("tmp &= ~0x{:08x};\n", self.and_mask));
                out.push_str(&format!("tmp |= 0x{:08x};\n", self.or_mask));
                out.push_str(&format!(
                    "pci_write_config{}(PCI_DEV(0x{:x}, 0x{:x}, 0x{:x}), 0x{:04x}, tmp);\n",
                    self.access_size, b, d, f, o
                ));
            }
        }
        out.push_str("}\n");
        out
    }
}
