//! C rendering of primitives and the branch-aware emission walk.
#![allow(clippy::expect_used)]

use super::{EmitWarning, Op, Primitive, ReadModifyWrite, emit_c, lower_entry};
use crate::mesh::Mesh;
use crate::options::OptionDomains;
use crate::test_helpers::{assign, entry, io_write};
use crate::trace::AccessKind;

fn read(kind: AccessKind, address: u64, value: u64, size: u32) -> String {
    Op::Read(Primitive {
        kind,
        address,
        value,
        access_size: size,
    })
    .to_c()
}

fn write(kind: AccessKind, address: u64, value: u64, size: u32) -> String {
    Op::Write(Primitive {
        kind,
        address,
        value,
        access_size: size,
    })
    .to_c()
}

// ── primitive reads ──────────────────────────────────────────────────────

#[test]
fn read_rendering_matches_exact_formats() {
    let cases = [
        (
            read(AccessKind::Mem32, 0, 0x1234, 8),
            "read8((void *)0x00000000); // 0x00001234\n",
        ),
        (
            read(AccessKind::Mem32, 1, 0x12345, 16),
            "read16((void *)0x00000001); // 0x00012345\n",
        ),
        (
            read(AccessKind::Mem32, 2, 0x123456, 32),
            "read32((void *)0x00000002); // 0x00123456\n",
        ),
        (read(AccessKind::Io, 0, 0xaa, 8), "inb(0x0000); // 0x000000aa\n"),
        (read(AccessKind::Io, 1, 0xaabb, 16), "inw(0x0001); // 0x0000aabb\n"),
        (
            read(AccessKind::Io, 2, 0x1122_3344, 32),
            "inl(0x0002); // 0x11223344\n",
        ),
        (
            read(AccessKind::Msr, 0x67, 0xaa | (0xbb << 32), 8),
            "rdmsr(0x00000067); // 0x000000bb000000aa\n",
        ),
        (
            read(AccessKind::Msr, 0x67, 0xbb | (0xaa << 32), 16),
            "rdmsr(0x00000067); // 0x000000aa000000bb\n",
        ),
        (
            read(AccessKind::Msr, 0x67, 0, 32),
            "rdmsr(0x00000067); // 0x0000000000000000\n",
        ),
        (
            read(AccessKind::Cpuid, 0x1, 0x756e_6547, 0),
            "cpuid(0x00000001); // 0x00000000756e6547\n",
        ),
    ];
    for (got, want) in cases {
        assert_eq!(got, want);
    }
}

#[test]
fn pci_read_decodes_bus_device_function() {
    // bus 1, device 2, function 3, offset 0x44
    let address = (1 << 20) | (2 << 15) | (3 << 12) | 0x44;
    assert_eq!(
        read(AccessKind::Pci, address, 0xbeef, 16),
        "pci_read_config16(PCI_DEV(0x1, 0x2, 0x3), 0x0044); // 0x0000beef\n"
    );
}

// ── primitive writes ─────────────────────────────────────────────────────

#[test]
fn write_rendering_matches_exact_formats() {
    let cases = [
        (
            write(AccessKind::Mem32, 0, 0x1234, 8),
            "write8((void *)0x00000000, 0x00001234);\n",
        ),
        (
            write(AccessKind::Mem32, 1, 0x12345, 16),
            "write16((void *)0x00000001, 0x00012345);\n",
        ),
        (
            write(AccessKind::Mem32, 2, 0x123456, 32),
            "write32((void *)0x00000002, 0x00123456);\n",
        ),
        (write(AccessKind::Io, 0, 0xaa, 8), "outb(0xaa, 0x0000);\n"),
        (write(AccessKind::Io, 1, 0xaabb, 16), "outw(0xaabb, 0x0001);\n"),
        (
            write(AccessKind::Io, 2, 0x1122_3344, 32),
            "outl(0x11223344, 0x0002);\n",
        ),
    ];
    for (got, want) in cases {
        assert_eq!(got, want);
    }
}

#[test]
fn msr_write_keeps_the_lo_hi_swap() {
    // .lo is assigned the upper half and .hi the lower half; downstream
    // consumers rely on exactly this output.
    assert_eq!(
        write(AccessKind::Msr, 0x67, 0xaa | (0xbb << 32), 8),
        "{\n\tmsr_t msr = {.lo = 0x000000bb, .hi = 0x000000aa};\n\twrmsr(0x00000067, msr);\n}\n"
    );
    assert_eq!(
        write(AccessKind::Msr, 0x67, 0xbb | (0xaa << 32), 16),
        "{\n\tmsr_t msr = {.lo = 0x000000aa, .hi = 0x000000bb};\n\twrmsr(0x00000067, msr);\n}\n"
    );
    assert_eq!(
        write(AccessKind::Msr, 0x67, 0, 32),
        "{\n\tmsr_t msr = {.lo = 0x00000000, .hi = 0x00000000};\n\twrmsr(0x00000067, msr);\n}\n"
    );
}

#[test]
fn pci_write_decodes_bus_device_function() {
    let address = (0xab << 20) | (0x1f << 15) | (0x7 << 12) | 0xffc;
    assert_eq!(
        write(AccessKind::Pci, address, 0x1234_5678, 32),
        "pci_write_config32(PCI_DEV(0xab, 0x1f, 0x7), 0x0ffc, 0x12345678);\n"
    );
}

// ── read-modify-write ────────────────────────────────────────────────────

#[test]
fn rmw_renders_a_masked_update_block() {
    let op = Op::ReadModifyWrite(ReadModifyWrite {
        kind: AccessKind::Mem32,
        address: 0x100,
        or_mask: 0x10,
        and_mask: 0xf,
        access_size: 32,
    });
    assert_eq!(
        op.to_c(),
        "{\nuint32_t tmp = read32((void *)0x00000100);\ntmp &= ~0x0000000f;\ntmp |= 0x00000010;\nwrite32((void *)0x00000100, tmp);\n}\n"
    );
}

#[test]
fn msr_rmw_splits_masks_into_halves() {
    let op = Op::ReadModifyWrite(ReadModifyWrite {
        kind: AccessKind::Msr,
        address: 0x1a0,
        or_mask: 0x1 | (0x2 << 32),
        and_mask: 0x4 | (0x8 << 32),
        access_size: 64,
    });
    assert_eq!(
        op.to_c(),
        "{\nmsr_t msr;\nmsr = rdmsr(0x000001a0);\nmsr.lo &= ~0x00000004;\nmsr.hi &= ~0x00000008;\nmsr.lo |=  0x00000001;\nmsr.hi |=  0x00000002;\nwrmsr(0x000001a0, msr);\n}\n"
    );
}

// ── lowering ─────────────────────────────────────────────────────────────

#[test]
fn lowering_picks_read_or_write_from_direction() {
    let r = entry(AccessKind::Io, true, 0x80, 0x55, 8);
    assert!(matches!(lower_entry(&r), Op::Read(_)));
    let w = entry(AccessKind::Io, false, 0x80, 0x55, 8);
    assert!(matches!(lower_entry(&w), Op::Write(_)));
}

// ── emission walk ────────────────────────────────────────────────────────

#[test]
fn linear_mesh_emits_straight_line_code_without_the_tail() {
    let entries = [io_write(1), io_write(2), io_write(3)];
    let mut mesh = Mesh::new();
    mesh.insert_trace(&entries, &assign(&[])).expect("merge");

    let emission = emit_c(&mesh);
    assert!(emission.warnings.is_empty());
    // the likeliest-path tail (the stop access in practice) is not emitted
    assert_eq!(emission.code, "outb(0x1, 0x0080);\noutb(0x2, 0x0080);\n");
}

/// Two traces with a shared prefix and suffix, differing in one access.
fn branching_mesh(opts1: &[(&str, u64)], opts2: &[(&str, u64)]) -> Mesh {
    let a = io_write(0xa0);
    let b = io_write(0xb0);
    let c = io_write(0xc0);
    let d = io_write(0xd0);
    let stop = io_write(0xee);

    let mut mesh = Mesh::new();
    mesh.insert_trace(&[a, b, d, stop], &assign(opts1))
        .expect("first trace");
    mesh.insert_trace(&[a, c, d, stop], &assign(opts2))
        .expect("second trace");
    mesh
}

#[test]
fn branching_mesh_emits_if_else_if() {
    let mut mesh = branching_mesh(&[("OPT1", 0)], &[("OPT1", 1)]);
    let mut domains = OptionDomains::new();
    domains.declare_range("OPT1", 0, 1);
    mesh.merge_duplicate_predecessors();
    mesh.reduce_option_sets(&domains);
    mesh.factor_common_predecessors();

    let emission = emit_c(&mesh);
    assert!(emission.warnings.is_empty());
    assert_eq!(
        emission.code,
        "outb(0xa0, 0x0080);\n\
         if (OPT1 == 0) {\n\
         \x20 outb(0xb0, 0x0080);\n\
         }\n\
         else if (OPT1 == 1) {\n\
         \x20 outb(0xc0, 0x0080);\n\
         }\n\
         outb(0xd0, 0x0080);\n"
    );
}

#[test]
fn unconditional_successor_becomes_the_else_branch() {
    let mesh = branching_mesh(&[("OPT1", 0)], &[]);

    let emission = emit_c(&mesh);
    assert!(emission.warnings.is_empty());
    assert_eq!(
        emission.code,
        "outb(0xa0, 0x0080);\n\
         if (OPT1 == 0) {\n\
         \x20 outb(0xb0, 0x0080);\n\
         }\n\
         else {\n\
         \x20 outb(0xc0, 0x0080);\n\
         }\n\
         outb(0xd0, 0x0080);\n"
    );
}

#[test]
fn branch_without_conditions_warns_and_emits_first_subtree() {
    let mesh = branching_mesh(&[], &[]);

    let emission = emit_c(&mesh);
    assert_eq!(emission.warnings.len(), 1);
    assert!(matches!(
        emission.warnings[0],
        EmitWarning::NoConditionalSuccessor { .. }
    ));
    assert_eq!(
        emission.code,
        "outb(0xa0, 0x0080);\noutb(0xb0, 0x0080);\noutb(0xd0, 0x0080);\n"
    );
}

#[test]
fn branches_without_a_merge_point_warn_and_stay_balanced() {
    let a = io_write(0xa0);
    let x = io_write(0x10);
    let y = io_write(0x20);
    let mut mesh = Mesh::new();
    mesh.insert_trace(&[a, x], &assign(&[("OPT1", 0)]))
        .expect("first trace");
    mesh.insert_trace(&[a, y], &assign(&[("OPT1", 1)]))
        .expect("second trace");

    let emission = emit_c(&mesh);
    assert_eq!(emission.warnings.len(), 1);
    assert!(matches!(
        emission.warnings[0],
        EmitWarning::NoMergePoint { .. }
    ));
    assert_eq!(emission.code, "outb(0xa0, 0x0080);\n");
    assert_eq!(
        emission.code.matches('{').count(),
        emission.code.matches('}').count()
    );
}

#[test]
fn disjunctive_conditions_break_across_aligned_lines() {
    let a = io_write(0xa0);
    let b = io_write(0xb0);
    let c = io_write(0xc0);
    let stop = io_write(0xee);

    let mut mesh = Mesh::new();
    mesh.insert_trace(&[a, b, stop], &assign(&[("OPT1", 1), ("OPT2", 2)]))
        .expect("first trace");
    mesh.insert_trace(&[a, b, stop], &assign(&[("OPT3", 3)]))
        .expect("second trace");
    mesh.insert_trace(&[a, c, stop], &assign(&[("OPT4", 4)]))
        .expect("third trace");

    let emission = emit_c(&mesh);
    assert!(emission.warnings.is_empty());
    assert_eq!(
        emission.code,
        "outb(0xa0, 0x0080);\n\
         if ((OPT1 == 1 && OPT2 == 2) ||\n\
         \x20   (OPT3 == 3)) {\n\
         \x20 outb(0xb0, 0x0080);\n\
         }\n\
         else if (OPT4 == 4) {\n\
         \x20 outb(0xc0, 0x0080);\n\
         }\n"
    );
}

#[test]
fn nested_branches_indent_two_spaces_per_level() {
    let a = io_write(0xa0);
    let b = io_write(0xb0);
    let x = io_write(0x10);
    let y = io_write(0x20);
    let c = io_write(0xc0);
    let d = io_write(0xd0);
    let stop = io_write(0xee);

    let mut mesh = Mesh::new();
    mesh.insert_trace(&[a, b, x, d, stop], &assign(&[("OPTA", 0), ("OPTB", 0)]))
        .expect("first trace");
    mesh.insert_trace(&[a, b, y, d, stop], &assign(&[("OPTA", 0), ("OPTB", 1)]))
        .expect("second trace");
    mesh.insert_trace(&[a, c, d, stop], &assign(&[("OPTA", 1)]))
        .expect("third trace");

    let mut domains = OptionDomains::new();
    domains.declare_range("OPTA", 0, 1);
    domains.declare_range("OPTB", 0, 1);
    mesh.reduce_option_sets(&domains);

    let emission = emit_c(&mesh);
    assert!(emission.warnings.is_empty());
    assert_eq!(
        emission.code,
        "outb(0xa0, 0x0080);\n\
         if (OPTA == 0) {\n\
         \x20 outb(0xb0, 0x0080);\n\
         \x20 if (OPTA == 0 && OPTB == 0) {\n\
         \x20   outb(0x10, 0x0080);\n\
         \x20 }\n\
         \x20 else if (OPTA == 0 && OPTB == 1) {\n\
         \x20   outb(0x20, 0x0080);\n\
         \x20 }\n\
         }\n\
         else if (OPTA == 1) {\n\
         \x20 outb(0xc0, 0x0080);\n\
         }\n\
         outb(0xd0, 0x0080);\n"
    );
}

#[test]
fn emission_of_an_empty_mesh_is_empty() {
    let mesh = Mesh::new();
    let emission = emit_c(&mesh);
    assert!(emission.code.is_empty());
    assert!(emission.warnings.is_empty());
}
