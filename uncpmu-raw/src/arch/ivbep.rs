//! Ivy Bridge-EP uncore definitions
//!
//! Register placement follows Sandy Bridge-EP. The cbox filter grows to 64
//! bits and is written as two halves, box init no longer sets freeze-enable
//! and the PCI side gains an IRP box with irregular counter spacing.
//!
//! ## References
//!
//! - Intel Xeon Processor E5-2600 v2 Product Family Uncore Performance
//!   Monitoring Reference Manual

use super::snbep;
use super::TID_EN_EXTRA_REG;
use crate::constraint::ExtraReg;
use crate::format::{attrs::*, FormatAttr};
use crate::generation::{ExtraDevice, PciUnit};
use crate::register::bits::*;
use crate::types::{Access, BoxInit, BoxOffset, CboxFilter, FilterWrite, OpsKind, UncoreType};

/// Distance from the low to the high half of a cbox filter
pub const CBO_FILTER_HIGH_OFFSET: u32 = 6;

pub const RAW_EVENT_MASK: u64 = CTL_EV_SEL_MASK | CTL_UMASK_MASK | CTL_EDGE_DET | CTL_TRESH_MASK;
pub const U_RAW_EVENT_MASK: u64 =
    CTL_EV_SEL_MASK | CTL_UMASK_MASK | CTL_EDGE_DET | snbep::U_CTL_TRESH_MASK;
pub const CBO_RAW_EVENT_MASK: u64 = RAW_EVENT_MASK | CTL_TID_EN;
pub const PCU_RAW_EVENT_MASK: u64 = CTL_EV_SEL_MASK
    | snbep::PCU_CTL_OCC_SEL_MASK
    | CTL_EDGE_DET
    | snbep::PCU_CTL_TRESH_MASK
    | snbep::PCU_CTL_OCC_INVERT
    | snbep::PCU_CTL_OCC_EDGE_DET;
pub const QPI_RAW_EVENT_MASK: u64 = RAW_EVENT_MASK | CTL_EV_SEL_EXT;

/// tid, link, state, nid, opcode plus the nc/c6/isoc qualifiers
pub static CBOX_FILTER_FIELDS: [u64; 5] = [
    0x1f,
    0xf << 5,
    0x3f << 17,
    0xffff << 32,
    (0x1ff << 52) | (1 << 61) | (1 << 62) | (1 << 63),
];

pub static CBOX_EXTRA_REGS: [ExtraReg; 36] = [
    TID_EN_EXTRA_REG,
    ExtraReg::new(0x1031, 0x10ff, 0x2),
    ExtraReg::new(0x1134, 0xffff, 0x4),
    ExtraReg::new(0x4134, 0xffff, 0xc),
    ExtraReg::new(0x5134, 0xffff, 0xc),
    ExtraReg::new(0x0334, 0xffff, 0x4),
    ExtraReg::new(0x4334, 0xffff, 0xc),
    ExtraReg::new(0x0534, 0xffff, 0x4),
    ExtraReg::new(0x4534, 0xffff, 0xc),
    ExtraReg::new(0x0934, 0xffff, 0x4),
    ExtraReg::new(0x4934, 0xffff, 0xc),
    ExtraReg::new(0x0135, 0xffff, 0x10),
    ExtraReg::new(0x0335, 0xffff, 0x10),
    ExtraReg::new(0x2135, 0xffff, 0x10),
    ExtraReg::new(0x2335, 0xffff, 0x10),
    ExtraReg::new(0x4135, 0xffff, 0x18),
    ExtraReg::new(0x4335, 0xffff, 0x18),
    ExtraReg::new(0x4435, 0xffff, 0x8),
    ExtraReg::new(0x4835, 0xffff, 0x8),
    ExtraReg::new(0x4a35, 0xffff, 0x8),
    ExtraReg::new(0x5035, 0xffff, 0x8),
    ExtraReg::new(0x8135, 0xffff, 0x10),
    ExtraReg::new(0x8335, 0xffff, 0x10),
    ExtraReg::new(0x0136, 0xffff, 0x10),
    ExtraReg::new(0x0336, 0xffff, 0x10),
    ExtraReg::new(0x2136, 0xffff, 0x10),
    ExtraReg::new(0x2336, 0xffff, 0x10),
    ExtraReg::new(0x4136, 0xffff, 0x18),
    ExtraReg::new(0x4336, 0xffff, 0x18),
    ExtraReg::new(0x4436, 0xffff, 0x8),
    ExtraReg::new(0x4836, 0xffff, 0x8),
    ExtraReg::new(0x4a36, 0xffff, 0x8),
    ExtraReg::new(0x5036, 0xffff, 0x8),
    ExtraReg::new(0x8136, 0xffff, 0x10),
    ExtraReg::new(0x8336, 0xffff, 0x10),
    ExtraReg::new(0x4037, 0x40ff, 0x8),
];

pub static CBOX_FILTER: CboxFilter = CboxFilter {
    base: snbep::msr::C0_PMON_BOX_FILTER,
    stride: snbep::msr::CBO_OFFSET,
    extra_regs: &CBOX_EXTRA_REGS,
    fields: &CBOX_FILTER_FIELDS,
    always_set: 0,
    write: FilterWrite::Split {
        high_offset: CBO_FILTER_HIGH_OFFSET,
    },
};

/// IRP control offsets by counter index
pub static IRP_CTLS: [u32; 4] = [0xd8, 0xdc, 0xe0, 0xe4];
/// IRP counter offsets by counter index
pub static IRP_CTRS: [u32; 4] = [0xa0, 0xb0, 0xb8, 0xc0];

pub static FORMATS: [FormatAttr; 5] = [EVENT, UMASK, EDGE, INV, THRESH8];
pub static UBOX_FORMATS: [FormatAttr; 5] = [EVENT, UMASK, EDGE, INV, THRESH5];
pub static CBOX_FORMATS: [FormatAttr; 13] = [
    EVENT,
    UMASK,
    EDGE,
    TID_EN,
    THRESH8,
    FILTER_TID,
    FILTER_LINK,
    FILTER_STATE2,
    FILTER_NID2,
    FILTER_OPC2,
    FILTER_NC,
    FILTER_C6,
    FILTER_ISOC,
];
pub static PCU_FORMATS: [FormatAttr; 10] = [
    EVENT, OCC_SEL, EDGE, THRESH5, OCC_INVERT, OCC_EDGE, FILTER_BAND0, FILTER_BAND1, FILTER_BAND2,
    FILTER_BAND3,
];
pub static QPI_FORMATS: [FormatAttr; 22] = [
    EVENT_EXT, UMASK, EDGE, THRESH8, MATCH_RDS, MATCH_RNID30, MATCH_RNID4, MATCH_DNID, MATCH_MC,
    MATCH_OPC, MATCH_VNW, MATCH0, MATCH1, MASK_RDS, MASK_RNID30, MASK_RNID4, MASK_DNID, MASK_MC,
    MASK_OPC, MASK_VNW, MASK0, MASK1,
];

pub static UBOX: UncoreType = UncoreType {
    name: "ubox",
    num_counters: 2,
    perf_ctr_bits: 44,
    fixed_ctr_bits: 48,
    perf_ctr: snbep::msr::U_PMON_CTR0,
    event_ctl: snbep::msr::U_PMON_CTL0,
    event_mask: U_RAW_EVENT_MASK,
    fixed_ctr: snbep::msr::U_PMON_UCLK_FIXED_CTR,
    fixed_ctl: snbep::msr::U_PMON_UCLK_FIXED_CTL,
    ops: OpsKind::Msr {
        init: BoxInit::Ivbep,
    },
    formats: &UBOX_FORMATS,
    ..UncoreType::DEFAULT
};

pub static CBOX: UncoreType = UncoreType {
    name: "cbox",
    num_counters: 4,
    num_boxes: 15,
    perf_ctr_bits: 44,
    event_ctl: snbep::msr::C0_PMON_CTL0,
    perf_ctr: snbep::msr::C0_PMON_CTR0,
    event_mask: CBO_RAW_EVENT_MASK,
    box_ctl: snbep::msr::C0_PMON_BOX_CTL,
    box_offset: BoxOffset::Uniform {
        stride: snbep::msr::CBO_OFFSET,
    },
    num_shared_regs: 1,
    constraints: &snbep::CBOX_CONSTRAINTS,
    ops: OpsKind::Cbox {
        init: BoxInit::Ivbep,
        filter: &CBOX_FILTER,
    },
    formats: &CBOX_FORMATS,
    ..UncoreType::DEFAULT
};

pub static PCU: UncoreType = UncoreType {
    name: "pcu",
    num_counters: 4,
    perf_ctr: snbep::msr::PCU_PMON_CTR0,
    event_ctl: snbep::msr::PCU_PMON_CTL0,
    event_mask: PCU_RAW_EVENT_MASK,
    box_ctl: snbep::msr::PCU_PMON_BOX_CTL,
    num_shared_regs: 1,
    ops: OpsKind::Pcu {
        init: BoxInit::Ivbep,
        filter_reg: snbep::msr::PCU_PMON_BOX_FILTER,
    },
    formats: &PCU_FORMATS,
    ..UncoreType::DEFAULT
};

pub const PCI_COMMON: UncoreType = UncoreType {
    access: Access::Pci,
    num_counters: 4,
    perf_ctr: snbep::pci::PMON_CTR0,
    event_ctl: snbep::pci::PMON_CTL0,
    event_mask: RAW_EVENT_MASK,
    box_ctl: snbep::pci::PMON_BOX_CTL,
    ops: OpsKind::Pci {
        init: BoxInit::Ivbep,
    },
    formats: &[],
    ..UncoreType::DEFAULT
};

pub static HA: UncoreType = UncoreType {
    name: "ha",
    num_boxes: 2,
    formats: &FORMATS,
    ..PCI_COMMON
};

pub static IMC: UncoreType = UncoreType {
    name: "imc",
    num_boxes: 8,
    fixed_ctr_bits: 48,
    fixed_ctr: snbep::pci::MC_CHY_FIXED_CTR,
    fixed_ctl: snbep::pci::MC_CHY_FIXED_CTL,
    event_descs: &snbep::IMC_EVENTS,
    formats: &FORMATS,
    ..PCI_COMMON
};

pub static IRP: UncoreType = UncoreType {
    name: "irp",
    perf_ctr: 0,
    event_ctl: 0,
    event_ctl_table: Some(&IRP_CTLS),
    perf_ctr_table: Some(&IRP_CTRS),
    formats: &FORMATS,
    ..PCI_COMMON
};

pub static QPI: UncoreType = UncoreType {
    name: "qpi",
    num_boxes: 3,
    event_mask: QPI_RAW_EVENT_MASK,
    num_shared_regs: 1,
    ops: OpsKind::Qpi {
        init: BoxInit::Ivbep,
    },
    formats: &QPI_FORMATS,
    ..PCI_COMMON
};

pub static R2PCIE: UncoreType = UncoreType {
    name: "r2pcie",
    perf_ctr_bits: 44,
    constraints: &snbep::R2PCIE_CONSTRAINTS,
    formats: &FORMATS,
    ..PCI_COMMON
};

pub static R3QPI: UncoreType = UncoreType {
    name: "r3qpi",
    num_counters: 3,
    num_boxes: 2,
    perf_ctr_bits: 44,
    constraints: &snbep::R3QPI_CONSTRAINTS,
    formats: &FORMATS,
    ..PCI_COMMON
};

pub static MSR_UNCORES: [&UncoreType; 3] = [&UBOX, &CBOX, &PCU];
pub static PCI_UNCORES: [&UncoreType; 6] = [&HA, &IMC, &IRP, &QPI, &R2PCIE, &R3QPI];

const HA_IDX: usize = 0;
const IMC_IDX: usize = 1;
const IRP_IDX: usize = 2;
const QPI_IDX: usize = 3;
const R2PCIE_IDX: usize = 4;
const R3QPI_IDX: usize = 5;

pub static PCI_UNITS: [PciUnit; 20] = [
    PciUnit::new(0xe30, HA_IDX, 0),
    PciUnit::new(0xe38, HA_IDX, 1),
    PciUnit::new(0xeb4, IMC_IDX, 0),
    PciUnit::new(0xeb5, IMC_IDX, 1),
    PciUnit::new(0xeb0, IMC_IDX, 2),
    PciUnit::new(0xeb1, IMC_IDX, 3),
    PciUnit::new(0xef4, IMC_IDX, 4),
    PciUnit::new(0xef5, IMC_IDX, 5),
    PciUnit::new(0xef0, IMC_IDX, 6),
    PciUnit::new(0xef1, IMC_IDX, 7),
    PciUnit::new(0xe39, IRP_IDX, 0),
    PciUnit::new(0xe32, QPI_IDX, 0),
    PciUnit::new(0xe33, QPI_IDX, 1),
    PciUnit::new(0xe3a, QPI_IDX, 2),
    PciUnit::new(0xe34, R2PCIE_IDX, 0),
    PciUnit::new(0xe36, R3QPI_IDX, 0),
    PciUnit::new(0xe37, R3QPI_IDX, 1),
    PciUnit::new(0xe3e, R3QPI_IDX, 2),
    PciUnit::extra(0xe86, ExtraDevice::QpiPort0Filter),
    PciUnit::extra(0xe96, ExtraDevice::QpiPort1Filter),
];

pub const UBOX_DEVICE_ID: u16 = 0x0e1e;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::extra_reg_fields;

    #[test]
    fn test_raw_event_masks_drop_invert() {
        assert_eq!(RAW_EVENT_MASK & CTL_INVERT, 0);
        assert_eq!(RAW_EVENT_MASK, 0xff04_ffff);
        assert_eq!(PCU_RAW_EVENT_MASK, 0xdf04_c0ff);
    }

    #[test]
    fn test_cbox_filter_split_write() {
        assert_eq!(extra_reg_fields(&CBOX_EXTRA_REGS, 0x4135), 0x18);
        assert_eq!(
            CBOX_FILTER.mask(0x10),
            (0x1ff << 52) | (1 << 61) | (1 << 62) | (1 << 63)
        );
        assert_eq!(CBOX_FILTER.write, FilterWrite::Split { high_offset: 6 });
        assert_eq!(CBOX.num_boxes, 15);
    }

    #[test]
    fn test_ubox_uses_snbep_registers() {
        assert_eq!(UBOX.fixed_ctl, snbep::msr::U_PMON_UCLK_FIXED_CTL);
        assert_eq!(UBOX.num_counters, 2);
        assert_eq!(UBOX.ops.init(), BoxInit::Ivbep);
    }
}
