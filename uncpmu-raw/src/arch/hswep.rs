//! Haswell-EP uncore definitions
//!
//! Cbox registers move to the 0xe00 block with a 0x10 stride and a split
//! 64-bit filter. New units: the ubox gains a tid/cid filter register and
//! up to four SBOX ring stops appear. Whether the last two SBOXes exist is
//! read from the PCU3 capability register.
//!
//! ## References
//!
//! - Intel Xeon Processor E5 and E7 v3 Family Uncore Performance
//!   Monitoring Reference Manual

use super::{snbep, TID_EN_EXTRA_REG};
use crate::constraint::{EventConstraint, ExtraReg};
use crate::format::{attrs::*, EventDesc, FormatAttr};
use crate::generation::{ExtraDevice, PciUnit};
use crate::register::bits::*;
use crate::types::{Access, BoxInit, BoxOffset, CboxFilter, FilterWrite, OpsKind, UncoreType};

/// Register addresses
pub mod msr {
    pub const U_PMON_CTR0: u32 = 0x709;
    pub const U_PMON_CTL0: u32 = 0x705;
    pub const U_PMON_UCLK_FIXED_CTR: u32 = 0x704;
    pub const U_PMON_UCLK_FIXED_CTL: u32 = 0x703;
    pub const U_PMON_BOX_FILTER: u32 = 0x707;

    pub const C0_PMON_CTL0: u32 = 0xe01;
    pub const C0_PMON_CTR0: u32 = 0xe08;
    pub const C0_PMON_BOX_CTL: u32 = 0xe00;
    pub const C0_PMON_BOX_FILTER0: u32 = 0xe05;
    pub const CBO_OFFSET: u32 = 0x10;

    pub const S0_PMON_CTL0: u32 = 0x721;
    pub const S0_PMON_CTR0: u32 = 0x726;
    pub const S0_PMON_BOX_CTL: u32 = 0x720;
    pub const SBOX_OFFSET: u32 = 0xa;

    pub const PCU_PMON_CTR0: u32 = 0x717;
    pub const PCU_PMON_CTL0: u32 = 0x711;
    pub const PCU_PMON_BOX_CTL: u32 = 0x710;
    pub const PCU_PMON_BOX_FILTER: u32 = 0x715;
}

/// PCI configuration space offsets
pub mod pci {
    /// Capability register on the PCU function 3 device
    pub const PCU3_CAPID4: u32 = 0x94;
}

pub const S_RAW_EVENT_MASK: u64 = snbep::RAW_EVENT_MASK | CTL_TID_EN;

/// Thread-id and core-id fields of the ubox filter
pub const U_FILTER_TID: u64 = 0x1;
pub const U_FILTER_CID: u64 = 0x1f << 1;
pub const U_FILTER_MASK: u64 = U_FILTER_TID | U_FILTER_CID;

/// tid, link, state, nid, opcode plus the nc/c6/isoc qualifiers
pub static CBOX_FILTER_FIELDS: [u64; 5] = [
    0x3f,
    0xf << 6,
    0x7f << 17,
    0xffff << 32,
    (0x1ff << 52) | (1 << 61) | (1 << 62) | (1 << 63),
];

pub static CBOX_EXTRA_REGS: [ExtraReg; 37] = [
    TID_EN_EXTRA_REG,
    ExtraReg::new(0x0334, 0xffff, 0x4),
    ExtraReg::new(0x0534, 0xffff, 0x4),
    ExtraReg::new(0x0934, 0xffff, 0x4),
    ExtraReg::new(0x1134, 0xffff, 0x4),
    ExtraReg::new(0x2134, 0xffff, 0x4),
    ExtraReg::new(0x4134, 0xffff, 0x4),
    ExtraReg::new(0x4037, 0x40ff, 0x8),
    ExtraReg::new(0x4028, 0x40ff, 0x8),
    ExtraReg::new(0x4032, 0x40ff, 0x8),
    ExtraReg::new(0x4029, 0x40ff, 0x8),
    ExtraReg::new(0x4033, 0x40ff, 0x8),
    ExtraReg::new(0x402a, 0x40ff, 0x8),
    ExtraReg::new(0x0135, 0xffff, 0x12),
    ExtraReg::new(0x0335, 0xffff, 0x10),
    ExtraReg::new(0x4135, 0xffff, 0x18),
    ExtraReg::new(0x4435, 0xffff, 0x8),
    ExtraReg::new(0x4835, 0xffff, 0x8),
    ExtraReg::new(0x5035, 0xffff, 0x8),
    ExtraReg::new(0x4335, 0xffff, 0x18),
    ExtraReg::new(0x4a35, 0xffff, 0x8),
    ExtraReg::new(0x2335, 0xffff, 0x10),
    ExtraReg::new(0x8335, 0xffff, 0x10),
    ExtraReg::new(0x2135, 0xffff, 0x10),
    ExtraReg::new(0x8135, 0xffff, 0x10),
    ExtraReg::new(0x0136, 0xffff, 0x10),
    ExtraReg::new(0x0336, 0xffff, 0x10),
    ExtraReg::new(0x4136, 0xffff, 0x18),
    ExtraReg::new(0x4436, 0xffff, 0x8),
    ExtraReg::new(0x4836, 0xffff, 0x8),
    ExtraReg::new(0x4336, 0xffff, 0x18),
    ExtraReg::new(0x4a36, 0xffff, 0x8),
    ExtraReg::new(0x2336, 0xffff, 0x10),
    ExtraReg::new(0x8336, 0xffff, 0x10),
    ExtraReg::new(0x2136, 0xffff, 0x10),
    ExtraReg::new(0x8136, 0xffff, 0x10),
    ExtraReg::new(0x5036, 0xffff, 0x8),
];

pub static CBOX_FILTER: CboxFilter = CboxFilter {
    base: msr::C0_PMON_BOX_FILTER0,
    stride: msr::CBO_OFFSET,
    extra_regs: &CBOX_EXTRA_REGS,
    fields: &CBOX_FILTER_FIELDS,
    always_set: 0,
    write: FilterWrite::Split { high_offset: 1 },
};

pub static CBOX_CONSTRAINTS: [EventConstraint; 7] = [
    EventConstraint::uncore(0x01, 0x1),
    EventConstraint::uncore(0x09, 0x1),
    EventConstraint::uncore(0x11, 0x1),
    EventConstraint::uncore(0x36, 0x1),
    EventConstraint::uncore(0x38, 0x3),
    EventConstraint::uncore(0x3b, 0x1),
    EventConstraint::uncore(0x3e, 0x1),
];

pub static R2PCIE_CONSTRAINTS: [EventConstraint; 18] = [
    EventConstraint::uncore(0x10, 0x3),
    EventConstraint::uncore(0x11, 0x3),
    EventConstraint::uncore(0x13, 0x1),
    EventConstraint::uncore(0x23, 0x1),
    EventConstraint::uncore(0x24, 0x1),
    EventConstraint::uncore(0x25, 0x1),
    EventConstraint::uncore(0x26, 0x3),
    EventConstraint::uncore(0x27, 0x1),
    EventConstraint::uncore(0x28, 0x3),
    EventConstraint::uncore(0x29, 0x3),
    EventConstraint::uncore(0x2a, 0x1),
    EventConstraint::uncore(0x2b, 0x3),
    EventConstraint::uncore(0x2c, 0x3),
    EventConstraint::uncore(0x2d, 0x3),
    EventConstraint::uncore(0x32, 0x3),
    EventConstraint::uncore(0x33, 0x3),
    EventConstraint::uncore(0x34, 0x3),
    EventConstraint::uncore(0x35, 0x3),
];

pub static R3QPI_CONSTRAINTS: [EventConstraint; 33] = [
    EventConstraint::uncore(0x01, 0x3),
    EventConstraint::uncore(0x07, 0x7),
    EventConstraint::uncore(0x08, 0x7),
    EventConstraint::uncore(0x09, 0x7),
    EventConstraint::uncore(0x0a, 0x7),
    EventConstraint::uncore(0x0e, 0x7),
    EventConstraint::uncore(0x10, 0x3),
    EventConstraint::uncore(0x11, 0x3),
    EventConstraint::uncore(0x12, 0x3),
    EventConstraint::uncore(0x13, 0x1),
    EventConstraint::uncore(0x14, 0x3),
    EventConstraint::uncore(0x15, 0x3),
    EventConstraint::uncore(0x1f, 0x3),
    EventConstraint::uncore(0x20, 0x3),
    EventConstraint::uncore(0x21, 0x3),
    EventConstraint::uncore(0x22, 0x3),
    EventConstraint::uncore(0x23, 0x3),
    EventConstraint::uncore(0x25, 0x3),
    EventConstraint::uncore(0x26, 0x3),
    EventConstraint::uncore(0x28, 0x3),
    EventConstraint::uncore(0x29, 0x3),
    EventConstraint::uncore(0x2c, 0x3),
    EventConstraint::uncore(0x2d, 0x3),
    EventConstraint::uncore(0x2e, 0x3),
    EventConstraint::uncore(0x2f, 0x3),
    EventConstraint::uncore(0x31, 0x3),
    EventConstraint::uncore(0x32, 0x3),
    EventConstraint::uncore(0x33, 0x3),
    EventConstraint::uncore(0x34, 0x3),
    EventConstraint::uncore(0x36, 0x3),
    EventConstraint::uncore(0x37, 0x3),
    EventConstraint::uncore(0x38, 0x3),
    EventConstraint::uncore(0x39, 0x3),
];

/// IRP control offsets by counter index
pub static IRP_CTLS: [u32; 4] = [0xd8, 0xdc, 0xe0, 0xe4];
/// IRP counter offsets by counter index
pub static IRP_CTRS: [u32; 4] = [0xa0, 0xa8, 0xb0, 0xb8];

pub static UBOX_FORMATS: [FormatAttr; 7] =
    [EVENT, UMASK, EDGE, INV, THRESH5, FILTER_TID2, FILTER_CID];
pub static CBOX_FORMATS: [FormatAttr; 13] = [
    EVENT,
    UMASK,
    EDGE,
    TID_EN,
    THRESH8,
    FILTER_TID3,
    FILTER_LINK2,
    FILTER_STATE3,
    FILTER_NID2,
    FILTER_OPC2,
    FILTER_NC,
    FILTER_C6,
    FILTER_ISOC,
];
pub static SBOX_FORMATS: [FormatAttr; 6] = [EVENT, UMASK, EDGE, TID_EN, INV, THRESH8];

pub static IMC_EVENTS: [EventDesc; 3] = [
    EventDesc::new("clockticks", "event=0x00,umask=0x00"),
    EventDesc::scaled(
        "cas_count_read",
        "event=0x04,umask=0x03",
        snbep::CAS_SCALE,
        "MiB",
    ),
    EventDesc::scaled(
        "cas_count_write",
        "event=0x04,umask=0x0c",
        snbep::CAS_SCALE,
        "MiB",
    ),
];

pub static UBOX: UncoreType = UncoreType {
    name: "ubox",
    num_counters: 2,
    perf_ctr_bits: 44,
    fixed_ctr_bits: 48,
    perf_ctr: msr::U_PMON_CTR0,
    event_ctl: msr::U_PMON_CTL0,
    event_mask: snbep::U_RAW_EVENT_MASK,
    fixed_ctr: msr::U_PMON_UCLK_FIXED_CTR,
    fixed_ctl: msr::U_PMON_UCLK_FIXED_CTL,
    num_shared_regs: 1,
    ops: OpsKind::Ubox {
        init: BoxInit::Snbep,
        filter_reg: msr::U_PMON_BOX_FILTER,
        filter_mask: U_FILTER_MASK,
    },
    formats: &UBOX_FORMATS,
    ..UncoreType::DEFAULT
};

pub static CBOX: UncoreType = UncoreType {
    name: "cbox",
    num_counters: 4,
    num_boxes: 18,
    event_ctl: msr::C0_PMON_CTL0,
    perf_ctr: msr::C0_PMON_CTR0,
    event_mask: snbep::CBO_RAW_EVENT_MASK,
    box_ctl: msr::C0_PMON_BOX_CTL,
    box_offset: BoxOffset::Uniform {
        stride: msr::CBO_OFFSET,
    },
    num_shared_regs: 1,
    constraints: &CBOX_CONSTRAINTS,
    ops: OpsKind::Cbox {
        init: BoxInit::Snbep,
        filter: &CBOX_FILTER,
    },
    formats: &CBOX_FORMATS,
    ..UncoreType::DEFAULT
};

pub static SBOX: UncoreType = UncoreType {
    name: "sbox",
    num_counters: 4,
    num_boxes: 4,
    perf_ctr_bits: 44,
    event_ctl: msr::S0_PMON_CTL0,
    perf_ctr: msr::S0_PMON_CTR0,
    event_mask: S_RAW_EVENT_MASK,
    box_ctl: msr::S0_PMON_BOX_CTL,
    box_offset: BoxOffset::Uniform {
        stride: msr::SBOX_OFFSET,
    },
    ops: OpsKind::Msr {
        init: BoxInit::BitByBit,
    },
    formats: &SBOX_FORMATS,
    ..UncoreType::DEFAULT
};

pub static PCU: UncoreType = UncoreType {
    name: "pcu",
    num_counters: 4,
    perf_ctr: msr::PCU_PMON_CTR0,
    event_ctl: msr::PCU_PMON_CTL0,
    event_mask: snbep::PCU_RAW_EVENT_MASK,
    box_ctl: msr::PCU_PMON_BOX_CTL,
    num_shared_regs: 1,
    ops: OpsKind::Pcu {
        init: BoxInit::Snbep,
        filter_reg: msr::PCU_PMON_BOX_FILTER,
    },
    formats: &snbep::PCU_FORMATS,
    ..UncoreType::DEFAULT
};

pub static HA: UncoreType = UncoreType {
    name: "ha",
    num_boxes: 2,
    formats: &snbep::FORMATS,
    ..snbep::PCI_COMMON
};

pub static IMC: UncoreType = UncoreType {
    name: "imc",
    num_boxes: 8,
    fixed_ctr_bits: 48,
    fixed_ctr: snbep::pci::MC_CHY_FIXED_CTR,
    fixed_ctl: snbep::pci::MC_CHY_FIXED_CTL,
    event_descs: &IMC_EVENTS,
    formats: &snbep::FORMATS,
    ..snbep::PCI_COMMON
};

pub static IRP: UncoreType = UncoreType {
    name: "irp",
    access: Access::Pci,
    num_counters: 4,
    event_mask: snbep::RAW_EVENT_MASK,
    box_ctl: snbep::pci::PMON_BOX_CTL,
    event_ctl_table: Some(&IRP_CTLS),
    perf_ctr_table: Some(&IRP_CTRS),
    ops: OpsKind::Pci {
        init: BoxInit::Snbep,
    },
    formats: &snbep::FORMATS,
    ..UncoreType::DEFAULT
};

pub static QPI: UncoreType = UncoreType {
    name: "qpi",
    num_boxes: 3,
    event_mask: snbep::QPI_RAW_EVENT_MASK,
    num_shared_regs: 1,
    ops: OpsKind::Qpi {
        init: BoxInit::Snbep,
    },
    formats: &snbep::QPI_FORMATS,
    ..snbep::PCI_COMMON
};

pub static R2PCIE: UncoreType = UncoreType {
    name: "r2pcie",
    constraints: &R2PCIE_CONSTRAINTS,
    formats: &snbep::FORMATS,
    ..snbep::PCI_COMMON
};

pub static R3QPI: UncoreType = UncoreType {
    name: "r3qpi",
    num_counters: 3,
    num_boxes: 3,
    perf_ctr_bits: 44,
    constraints: &R3QPI_CONSTRAINTS,
    formats: &snbep::FORMATS,
    ..snbep::PCI_COMMON
};

/// Index of the SBOX entry in [`MSR_UNCORES`]
pub const SBOX_TYPE_INDEX: usize = 2;

pub static MSR_UNCORES: [&UncoreType; 4] = [&UBOX, &CBOX, &SBOX, &PCU];
pub static PCI_UNCORES: [&UncoreType; 6] = [&HA, &IMC, &IRP, &QPI, &R2PCIE, &R3QPI];

const HA_IDX: usize = 0;
const IMC_IDX: usize = 1;
const IRP_IDX: usize = 2;
const QPI_IDX: usize = 3;
const R2PCIE_IDX: usize = 4;
const R3QPI_IDX: usize = 5;

pub static PCI_UNITS: [PciUnit; 21] = [
    PciUnit::new(0x2f30, HA_IDX, 0),
    PciUnit::new(0x2f38, HA_IDX, 1),
    PciUnit::new(0x2fb0, IMC_IDX, 0),
    PciUnit::new(0x2fb1, IMC_IDX, 1),
    PciUnit::new(0x2fb4, IMC_IDX, 2),
    PciUnit::new(0x2fb5, IMC_IDX, 3),
    PciUnit::new(0x2fd0, IMC_IDX, 4),
    PciUnit::new(0x2fd1, IMC_IDX, 5),
    PciUnit::new(0x2fd4, IMC_IDX, 6),
    PciUnit::new(0x2fd5, IMC_IDX, 7),
    PciUnit::new(0x2f39, IRP_IDX, 0),
    PciUnit::new(0x2f32, QPI_IDX, 0),
    PciUnit::new(0x2f33, QPI_IDX, 1),
    PciUnit::new(0x2f3a, QPI_IDX, 2),
    PciUnit::new(0x2f34, R2PCIE_IDX, 0),
    PciUnit::new(0x2f36, R3QPI_IDX, 0),
    PciUnit::new(0x2f37, R3QPI_IDX, 1),
    PciUnit::new(0x2f3e, R3QPI_IDX, 2),
    PciUnit::extra(0x2f86, ExtraDevice::QpiPort0Filter),
    PciUnit::extra(0x2f96, ExtraDevice::QpiPort1Filter),
    PciUnit::extra(0x2fc0, ExtraDevice::Pcu3),
];

pub const UBOX_DEVICE_ID: u16 = 0x2f1e;

/// SBOXes 2 and 3 are absent when the CAPID4 chop field reads zero
pub fn sbox_count_from_capid4(capid4: u32) -> Option<usize> {
    if (capid4 >> 6) & 0x3 == 0 {
        Some(2)
    } else {
        None
    }
}
