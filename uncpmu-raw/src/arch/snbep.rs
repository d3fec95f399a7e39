//! Sandy Bridge-EP uncore definitions
//!
//! MSR units: ubox, 8 cboxes sharing one filter register each, and the PCU
//! with its four byte-lane band filters. PCI units: home agent, four memory
//! channels, two QPI ports, R2PCIe and two R3QPI links.
//!
//! ## References
//!
//! - Intel Xeon Processor E5-2600 Product Family Uncore Performance
//!   Monitoring Guide

use super::TID_EN_EXTRA_REG;
use crate::constraint::{EventConstraint, ExtraReg};
use crate::format::{attrs::*, EventDesc, FormatAttr};
use crate::generation::{ExtraDevice, PciUnit};
use crate::register::bits::*;
use crate::types::{Access, BoxInit, BoxOffset, CboxFilter, FilterWrite, OpsKind, UncoreType};

/// Register addresses
pub mod msr {
    pub const U_PMON_CTR0: u32 = 0xc16;
    pub const U_PMON_CTL0: u32 = 0xc10;
    pub const U_PMON_UCLK_FIXED_CTL: u32 = 0xc08;
    pub const U_PMON_UCLK_FIXED_CTR: u32 = 0xc09;

    pub const C0_PMON_CTR0: u32 = 0xd16;
    pub const C0_PMON_CTL0: u32 = 0xd10;
    pub const C0_PMON_BOX_CTL: u32 = 0xd04;
    pub const C0_PMON_BOX_FILTER: u32 = 0xd14;
    pub const CBO_OFFSET: u32 = 0x20;

    pub const PCU_PMON_CTR0: u32 = 0xc36;
    pub const PCU_PMON_CTL0: u32 = 0xc30;
    pub const PCU_PMON_BOX_CTL: u32 = 0xc24;
    pub const PCU_PMON_BOX_FILTER: u32 = 0xc34;
}

/// PCI configuration space offsets
pub mod pci {
    pub const PMON_BOX_CTL: u32 = 0xf4;
    pub const PMON_CTL0: u32 = 0xd8;
    pub const PMON_CTR0: u32 = 0xa0;

    pub const MC_CHY_FIXED_CTL: u32 = 0xf0;
    pub const MC_CHY_FIXED_CTR: u32 = 0xd0;

    pub const Q_PY_PKT_MATCH0: u32 = 0x228;
    pub const Q_PY_PKT_MASK0: u32 = 0x238;

    /// Node id of the local package, on the ubox device
    pub const CPUNODEID: u32 = 0x40;
    /// Node id to package map, 3 bits per package
    pub const GIDNIDMAP: u32 = 0x54;
}

pub const U_CTL_TRESH_MASK: u64 = 0x1f00_0000;
pub const PCU_CTL_OCC_SEL_MASK: u64 = 0x0000_c000;
pub const PCU_CTL_TRESH_MASK: u64 = 0x1f00_0000;
pub const PCU_CTL_OCC_INVERT: u64 = 1 << 30;
pub const PCU_CTL_OCC_EDGE_DET: u64 = 1 << 31;

pub const RAW_EVENT_MASK: u64 =
    CTL_EV_SEL_MASK | CTL_UMASK_MASK | CTL_EDGE_DET | CTL_INVERT | CTL_TRESH_MASK;
pub const U_RAW_EVENT_MASK: u64 =
    CTL_EV_SEL_MASK | CTL_UMASK_MASK | CTL_EDGE_DET | CTL_INVERT | U_CTL_TRESH_MASK;
pub const CBO_RAW_EVENT_MASK: u64 = RAW_EVENT_MASK | CTL_TID_EN;
pub const PCU_RAW_EVENT_MASK: u64 = CTL_EV_SEL_MASK
    | PCU_CTL_OCC_SEL_MASK
    | CTL_EDGE_DET
    | CTL_INVERT
    | PCU_CTL_TRESH_MASK
    | PCU_CTL_OCC_INVERT
    | PCU_CTL_OCC_EDGE_DET;
pub const QPI_RAW_EVENT_MASK: u64 = RAW_EVENT_MASK | CTL_EV_SEL_EXT;

/// Cbox filter sub-fields: tid, nid, state, opcode
pub static CBOX_FILTER_FIELDS: [u64; 4] = [0x1f, 0x3fc00, 0x7c_0000, 0xff80_0000];

pub static CBOX_EXTRA_REGS: [ExtraReg; 24] = [
    TID_EN_EXTRA_REG,
    ExtraReg::new(0x0334, 0xffff, 0x4),
    ExtraReg::new(0x4334, 0xffff, 0x6),
    ExtraReg::new(0x0534, 0xffff, 0x4),
    ExtraReg::new(0x4534, 0xffff, 0x6),
    ExtraReg::new(0x0934, 0xffff, 0x4),
    ExtraReg::new(0x4934, 0xffff, 0x6),
    ExtraReg::new(0x4134, 0xffff, 0x6),
    ExtraReg::new(0x0135, 0xffff, 0x8),
    ExtraReg::new(0x0335, 0xffff, 0x8),
    ExtraReg::new(0x4135, 0xffff, 0xa),
    ExtraReg::new(0x4335, 0xffff, 0xa),
    ExtraReg::new(0x4435, 0xffff, 0x2),
    ExtraReg::new(0x4835, 0xffff, 0x2),
    ExtraReg::new(0x4a35, 0xffff, 0x2),
    ExtraReg::new(0x5035, 0xffff, 0x2),
    ExtraReg::new(0x0136, 0xffff, 0x8),
    ExtraReg::new(0x0336, 0xffff, 0x8),
    ExtraReg::new(0x4136, 0xffff, 0xa),
    ExtraReg::new(0x4336, 0xffff, 0xa),
    ExtraReg::new(0x4436, 0xffff, 0x2),
    ExtraReg::new(0x4836, 0xffff, 0x2),
    ExtraReg::new(0x4a36, 0xffff, 0x2),
    ExtraReg::new(0x4037, 0x40ff, 0x2),
];

pub static CBOX_FILTER: CboxFilter = CboxFilter {
    base: msr::C0_PMON_BOX_FILTER,
    stride: msr::CBO_OFFSET,
    extra_regs: &CBOX_EXTRA_REGS,
    fields: &CBOX_FILTER_FIELDS,
    always_set: 0,
    write: FilterWrite::Single,
};

pub static CBOX_CONSTRAINTS: [EventConstraint; 26] = [
    EventConstraint::uncore(0x01, 0x1),
    EventConstraint::uncore(0x02, 0x3),
    EventConstraint::uncore(0x04, 0x3),
    EventConstraint::uncore(0x05, 0x3),
    EventConstraint::uncore(0x07, 0x3),
    EventConstraint::uncore(0x09, 0x3),
    EventConstraint::uncore(0x11, 0x1),
    EventConstraint::uncore(0x12, 0x3),
    EventConstraint::uncore(0x13, 0x3),
    EventConstraint::uncore(0x1b, 0xc),
    EventConstraint::uncore(0x1c, 0xc),
    EventConstraint::uncore(0x1d, 0xc),
    EventConstraint::uncore(0x1e, 0xc),
    EventConstraint::uncore_overlap(0x1f, 0xe),
    EventConstraint::uncore(0x21, 0x3),
    EventConstraint::uncore(0x23, 0x3),
    EventConstraint::uncore(0x31, 0x3),
    EventConstraint::uncore(0x32, 0x3),
    EventConstraint::uncore(0x33, 0x3),
    EventConstraint::uncore(0x34, 0x3),
    EventConstraint::uncore(0x35, 0x3),
    EventConstraint::uncore(0x36, 0x1),
    EventConstraint::uncore(0x37, 0x3),
    EventConstraint::uncore(0x38, 0x3),
    EventConstraint::uncore(0x39, 0x3),
    EventConstraint::uncore(0x3b, 0x1),
];

pub static R2PCIE_CONSTRAINTS: [EventConstraint; 10] = [
    EventConstraint::uncore(0x10, 0x3),
    EventConstraint::uncore(0x11, 0x3),
    EventConstraint::uncore(0x12, 0x1),
    EventConstraint::uncore(0x23, 0x3),
    EventConstraint::uncore(0x24, 0x3),
    EventConstraint::uncore(0x25, 0x3),
    EventConstraint::uncore(0x26, 0x3),
    EventConstraint::uncore(0x32, 0x3),
    EventConstraint::uncore(0x33, 0x3),
    EventConstraint::uncore(0x34, 0x3),
];

pub static R3QPI_CONSTRAINTS: [EventConstraint; 28] = [
    EventConstraint::uncore(0x10, 0x3),
    EventConstraint::uncore(0x11, 0x3),
    EventConstraint::uncore(0x12, 0x3),
    EventConstraint::uncore(0x13, 0x1),
    EventConstraint::uncore(0x20, 0x3),
    EventConstraint::uncore(0x21, 0x3),
    EventConstraint::uncore(0x22, 0x3),
    EventConstraint::uncore(0x23, 0x3),
    EventConstraint::uncore(0x24, 0x3),
    EventConstraint::uncore(0x25, 0x3),
    EventConstraint::uncore(0x26, 0x3),
    EventConstraint::uncore(0x28, 0x3),
    EventConstraint::uncore(0x29, 0x3),
    EventConstraint::uncore(0x2a, 0x3),
    EventConstraint::uncore(0x2b, 0x3),
    EventConstraint::uncore(0x2c, 0x3),
    EventConstraint::uncore(0x2d, 0x3),
    EventConstraint::uncore(0x2e, 0x3),
    EventConstraint::uncore(0x2f, 0x3),
    EventConstraint::uncore(0x30, 0x3),
    EventConstraint::uncore(0x31, 0x3),
    EventConstraint::uncore(0x32, 0x3),
    EventConstraint::uncore(0x33, 0x3),
    EventConstraint::uncore(0x34, 0x3),
    EventConstraint::uncore(0x36, 0x3),
    EventConstraint::uncore(0x37, 0x3),
    EventConstraint::uncore(0x38, 0x3),
    EventConstraint::uncore(0x39, 0x3),
];

pub static FORMATS: [FormatAttr; 5] = [EVENT, UMASK, EDGE, INV, THRESH8];
pub static UBOX_FORMATS: [FormatAttr; 5] = [EVENT, UMASK, EDGE, INV, THRESH5];
pub static CBOX_FORMATS: [FormatAttr; 10] = [
    EVENT, UMASK, EDGE, TID_EN, INV, THRESH8, FILTER_TID, FILTER_NID, FILTER_STATE, FILTER_OPC,
];
pub static PCU_FORMATS: [FormatAttr; 11] = [
    EVENT, OCC_SEL, EDGE, INV, THRESH5, OCC_INVERT, OCC_EDGE, FILTER_BAND0, FILTER_BAND1,
    FILTER_BAND2, FILTER_BAND3,
];
pub static QPI_FORMATS: [FormatAttr; 23] = [
    EVENT_EXT, UMASK, EDGE, INV, THRESH8, MATCH_RDS, MATCH_RNID30, MATCH_RNID4, MATCH_DNID,
    MATCH_MC, MATCH_OPC, MATCH_VNW, MATCH0, MATCH1, MASK_RDS, MASK_RNID30, MASK_RNID4, MASK_DNID,
    MASK_MC, MASK_OPC, MASK_VNW, MASK0, MASK1,
];

/// 64-byte cache lines expressed in MiB
pub const CAS_SCALE: &str = "6.103515625e-5";

pub static IMC_EVENTS: [EventDesc; 3] = [
    EventDesc::new("clockticks", "event=0xff,umask=0x00"),
    EventDesc::scaled("cas_count_read", "event=0x04,umask=0x03", CAS_SCALE, "MiB"),
    EventDesc::scaled("cas_count_write", "event=0x04,umask=0x0c", CAS_SCALE, "MiB"),
];

pub static QPI_EVENTS: [EventDesc; 4] = [
    EventDesc::new("clockticks", "event=0x14"),
    EventDesc::new("txl_flits_active", "event=0x00,umask=0x06"),
    EventDesc::new("drs_data", "event=0x102,umask=0x08"),
    EventDesc::new("ncb_data", "event=0x103,umask=0x04"),
];

pub static UBOX: UncoreType = UncoreType {
    name: "ubox",
    num_counters: 2,
    perf_ctr_bits: 44,
    fixed_ctr_bits: 48,
    perf_ctr: msr::U_PMON_CTR0,
    event_ctl: msr::U_PMON_CTL0,
    event_mask: U_RAW_EVENT_MASK,
    fixed_ctr: msr::U_PMON_UCLK_FIXED_CTR,
    fixed_ctl: msr::U_PMON_UCLK_FIXED_CTL,
    formats: &UBOX_FORMATS,
    ..UncoreType::DEFAULT
};

pub static CBOX: UncoreType = UncoreType {
    name: "cbox",
    num_counters: 4,
    num_boxes: 8,
    perf_ctr_bits: 44,
    event_ctl: msr::C0_PMON_CTL0,
    perf_ctr: msr::C0_PMON_CTR0,
    event_mask: CBO_RAW_EVENT_MASK,
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

pub static PCU: UncoreType = UncoreType {
    name: "pcu",
    num_counters: 4,
    perf_ctr: msr::PCU_PMON_CTR0,
    event_ctl: msr::PCU_PMON_CTL0,
    event_mask: PCU_RAW_EVENT_MASK,
    box_ctl: msr::PCU_PMON_BOX_CTL,
    num_shared_regs: 1,
    ops: OpsKind::Pcu {
        init: BoxInit::Snbep,
        filter_reg: msr::PCU_PMON_BOX_FILTER,
    },
    formats: &PCU_FORMATS,
    ..UncoreType::DEFAULT
};

/// Fields shared by the plain PCI unit types
pub const PCI_COMMON: UncoreType = UncoreType {
    access: Access::Pci,
    num_counters: 4,
    perf_ctr: pci::PMON_CTR0,
    event_ctl: pci::PMON_CTL0,
    event_mask: RAW_EVENT_MASK,
    box_ctl: pci::PMON_BOX_CTL,
    ops: OpsKind::Pci {
        init: BoxInit::Snbep,
    },
    formats: &[],
    ..UncoreType::DEFAULT
};

pub static HA: UncoreType = UncoreType {
    name: "ha",
    formats: &FORMATS,
    ..PCI_COMMON
};

pub static IMC: UncoreType = UncoreType {
    name: "imc",
    num_boxes: 4,
    fixed_ctr_bits: 48,
    fixed_ctr: pci::MC_CHY_FIXED_CTR,
    fixed_ctl: pci::MC_CHY_FIXED_CTL,
    event_descs: &IMC_EVENTS,
    formats: &FORMATS,
    ..PCI_COMMON
};

pub static QPI: UncoreType = UncoreType {
    name: "qpi",
    num_boxes: 2,
    event_mask: QPI_RAW_EVENT_MASK,
    num_shared_regs: 1,
    ops: OpsKind::Qpi {
        init: BoxInit::Snbep,
    },
    event_descs: &QPI_EVENTS,
    formats: &QPI_FORMATS,
    ..PCI_COMMON
};

pub static R2PCIE: UncoreType = UncoreType {
    name: "r2pcie",
    perf_ctr_bits: 44,
    constraints: &R2PCIE_CONSTRAINTS,
    formats: &FORMATS,
    ..PCI_COMMON
};

pub static R3QPI: UncoreType = UncoreType {
    name: "r3qpi",
    num_counters: 3,
    num_boxes: 2,
    perf_ctr_bits: 44,
    constraints: &R3QPI_CONSTRAINTS,
    formats: &FORMATS,
    ..PCI_COMMON
};

pub static MSR_UNCORES: [&UncoreType; 3] = [&UBOX, &CBOX, &PCU];
pub static PCI_UNCORES: [&UncoreType; 5] = [&HA, &IMC, &QPI, &R2PCIE, &R3QPI];

const HA_IDX: usize = 0;
const IMC_IDX: usize = 1;
const QPI_IDX: usize = 2;
const R2PCIE_IDX: usize = 3;
const R3QPI_IDX: usize = 4;

pub static PCI_UNITS: [PciUnit; 12] = [
    PciUnit::new(0x3c46, HA_IDX, 0),
    PciUnit::new(0x3cb0, IMC_IDX, 0),
    PciUnit::new(0x3cb1, IMC_IDX, 1),
    PciUnit::new(0x3cb4, IMC_IDX, 2),
    PciUnit::new(0x3cb5, IMC_IDX, 3),
    PciUnit::new(0x3c41, QPI_IDX, 0),
    PciUnit::new(0x3c42, QPI_IDX, 1),
    PciUnit::new(0x3c43, R2PCIE_IDX, 0),
    PciUnit::new(0x3c44, R3QPI_IDX, 0),
    PciUnit::new(0x3c45, R3QPI_IDX, 1),
    PciUnit::extra(0x3c86, ExtraDevice::QpiPort0Filter),
    PciUnit::extra(0x3c96, ExtraDevice::QpiPort1Filter),
];

/// Ubox device carrying the node-id registers
pub const UBOX_DEVICE_ID: u16 = 0x3ce0;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{extra_reg_fields, lookup_constraint};

    #[test]
    fn test_raw_event_masks() {
        assert_eq!(RAW_EVENT_MASK, 0xff84_ffff);
        assert_eq!(U_RAW_EVENT_MASK, 0x1f84_ffff);
        assert_eq!(CBO_RAW_EVENT_MASK, 0xff8c_ffff);
        assert_eq!(PCU_RAW_EVENT_MASK, 0xdf84_c0ff);
        assert_eq!(QPI_RAW_EVENT_MASK, 0xffa4_ffff);
    }

    #[test]
    fn test_cbox_tables() {
        let c = lookup_constraint(&CBOX_CONSTRAINTS, 0x031f).unwrap();
        assert_eq!(c.idxmsk, 0xe);
        assert!(c.overlap);
        assert!(lookup_constraint(&CBOX_CONSTRAINTS, 0x0040).is_none());

        // LLC lookup with opcode match needs state and opcode sub-fields
        assert_eq!(extra_reg_fields(&CBOX_EXTRA_REGS, 0x4334), 0x6);
        assert_eq!(CBOX_FILTER.mask(0x6), 0x7c_0000 | 0xff80_0000);
        assert_eq!(CBOX_FILTER.register(3), 0xd74);
    }

    #[test]
    fn test_pci_types() {
        assert_eq!(IMC.access, Access::Pci);
        assert!(IMC.has_fixed());
        assert_eq!(IMC.event_desc("cas_count_read").unwrap().unit, Some("MiB"));
        assert_eq!(R3QPI.max_events(), 3);
        assert_eq!(QPI.format("match_opc").unwrap().spec, "config1:5-8");
    }
}
