//! Knights Landing uncore definitions
//!
//! Up to 38 CHA boxes with a three-field filter that always keeps the
//! remote/local/near-memory qualifiers set. Memory and EDC controllers
//! live on PCI devices identified by device/function as well as device id.
//! Single socket only.
//!
//! ## References
//!
//! - Intel Xeon Phi Processor Performance Monitoring Reference Manual,
//!   Volume 2: Events

use super::{hswep, snbep, TID_EN_EXTRA_REG};
use crate::constraint::{EventConstraint, ExtraReg};
use crate::format::{attrs::*, FormatAttr};
use crate::generation::PciUnit;
use crate::register::bits::*;
use crate::types::{Access, BoxInit, BoxOffset, CboxFilter, FilterWrite, OpsKind, UncoreType};

/// Register addresses
pub mod msr {
    pub const CHA_OFFSET: u32 = 0xc;
    pub const CHA_PMON_BOX_FILTER0: u32 = 0xe05;

    pub const PCU_PMON_CTR0: u32 = 0x717;
    pub const PCU_PMON_CTL0: u32 = 0x711;
    pub const PCU_PMON_BOX_CTL: u32 = 0x710;
}

/// PCI configuration space offsets
pub mod pci {
    pub const MC0_CH0_MSR_PMON_CTR0_LOW: u32 = 0x400;
    pub const MC0_CH0_MSR_PMON_CTL0: u32 = 0x420;
    pub const MC0_CH0_MSR_PMON_BOX_CTL: u32 = 0x430;
    pub const MC0_CH0_MSR_PMON_FIXED_LOW: u32 = 0x44c;
    pub const MC0_CH0_MSR_PMON_FIXED_CTL: u32 = 0x454;

    pub const MC_DCLK_PMON_CTR0_LOW: u32 = 0xb00;
    pub const MC_DCLK_PMON_CTL0: u32 = 0xb20;
    pub const MC_DCLK_PMON_BOX_CTL: u32 = 0xb30;
    pub const MC_DCLK_PMON_FIXED_LOW: u32 = 0xb3c;
    pub const MC_DCLK_PMON_FIXED_CTL: u32 = 0xb44;

    pub const EDC_ECLK_PMON_CTR0_LOW: u32 = 0xa00;
    pub const EDC_ECLK_PMON_CTL0: u32 = 0xa20;
    pub const EDC_ECLK_PMON_BOX_CTL: u32 = 0xa30;
    pub const EDC_ECLK_PMON_FIXED_LOW: u32 = 0xa3c;
    pub const EDC_ECLK_PMON_FIXED_CTL: u32 = 0xa44;

    pub const IRP_PCI_PMON_BOX_CTL: u32 = 0xf0;
}

/// Fixed-counter enable value of the memory boxes
pub const PMON_FIXED_CTL_EN: u64 = KNL_FIXED_CTL_EN;

pub const CHA_CTL_QOR: u64 = 1 << 16;
pub const PCU_PMON_CTL_EV_SEL_MASK: u64 = 0x7f;
pub const PCU_PMON_CTL_USE_OCC_CTR: u64 = 1 << 7;
pub const PCU_MSR_PMON_CTL_TRESH_MASK: u64 = 0x3f00_0000;

pub const U_RAW_EVENT_MASK: u64 = snbep::U_RAW_EVENT_MASK | CTL_TID_EN;
pub const CHA_RAW_EVENT_MASK: u64 = snbep::CBO_RAW_EVENT_MASK | CHA_CTL_QOR;
pub const IRP_RAW_EVENT_MASK: u64 = snbep::RAW_EVENT_MASK | CHA_CTL_QOR;
pub const PCU_RAW_EVENT_MASK: u64 = PCU_PMON_CTL_EV_SEL_MASK
    | PCU_PMON_CTL_USE_OCC_CTR
    | snbep::PCU_CTL_OCC_SEL_MASK
    | CTL_EDGE_DET
    | CTL_TID_EN
    | CTL_INVERT
    | PCU_MSR_PMON_CTL_TRESH_MASK
    | snbep::PCU_CTL_OCC_INVERT
    | snbep::PCU_CTL_OCC_EDGE_DET;

/// Remote node, local node and near-memory-cacheable qualifiers
pub const CHA_FILTER_ALWAYS_SET: u64 = (1 << 32) | (1 << 33) | (1 << 37);

/// tid, state, opcode
pub static CHA_FILTER_FIELDS: [u64; 3] = [0x1ff, 0x7 << 18, 0xffff_fe2a << 32];

pub static CHA_EXTRA_REGS: [ExtraReg; 4] = [
    TID_EN_EXTRA_REG,
    ExtraReg::new(0x3d, 0xff, 0x2),
    ExtraReg::new(0x35, 0xff, 0x4),
    ExtraReg::new(0x36, 0xff, 0x4),
];

pub static CHA_FILTER: CboxFilter = CboxFilter {
    base: msr::CHA_PMON_BOX_FILTER0,
    stride: msr::CHA_OFFSET,
    extra_regs: &CHA_EXTRA_REGS,
    fields: &CHA_FILTER_FIELDS,
    always_set: CHA_FILTER_ALWAYS_SET,
    write: FilterWrite::Split { high_offset: 1 },
};

pub static CHA_CONSTRAINTS: [EventConstraint; 3] = [
    EventConstraint::uncore(0x11, 0x1),
    EventConstraint::uncore(0x1f, 0x1),
    EventConstraint::uncore(0x36, 0x1),
];

pub static M2PCIE_CONSTRAINTS: [EventConstraint; 1] = [EventConstraint::uncore(0x23, 0x3)];

pub static UBOX_FORMATS: [FormatAttr; 6] = [EVENT, UMASK, EDGE, TID_EN, INV, THRESH5];
pub static CHA_FORMATS: [FormatAttr; 16] = [
    EVENT,
    UMASK,
    QOR,
    EDGE,
    TID_EN,
    INV,
    THRESH8,
    FILTER_TID4,
    FILTER_LINK3,
    FILTER_STATE4,
    FILTER_LOCAL,
    FILTER_ALL_OP,
    FILTER_NNM,
    FILTER_OPC3,
    FILTER_NC,
    FILTER_ISOC,
];
pub static PCU_FORMATS: [FormatAttr; 9] = [
    EVENT2,
    USE_OCC_CTR,
    OCC_SEL,
    EDGE,
    TID_EN,
    INV,
    THRESH6,
    OCC_INVERT,
    OCC_EDGE_DET,
];
pub static IRP_FORMATS: [FormatAttr; 6] = [EVENT, UMASK, QOR, EDGE, INV, THRESH8];

pub static UBOX: UncoreType = UncoreType {
    name: "ubox",
    num_counters: 2,
    fixed_ctr_bits: 48,
    perf_ctr: hswep::msr::U_PMON_CTR0,
    event_ctl: hswep::msr::U_PMON_CTL0,
    event_mask: U_RAW_EVENT_MASK,
    fixed_ctr: hswep::msr::U_PMON_UCLK_FIXED_CTR,
    fixed_ctl: hswep::msr::U_PMON_UCLK_FIXED_CTL,
    formats: &UBOX_FORMATS,
    ..UncoreType::DEFAULT
};

pub static CHA: UncoreType = UncoreType {
    name: "cha",
    num_counters: 4,
    num_boxes: 38,
    event_ctl: hswep::msr::C0_PMON_CTL0,
    perf_ctr: hswep::msr::C0_PMON_CTR0,
    event_mask: CHA_RAW_EVENT_MASK,
    box_ctl: hswep::msr::C0_PMON_BOX_CTL,
    box_offset: BoxOffset::Uniform {
        stride: msr::CHA_OFFSET,
    },
    num_shared_regs: 1,
    constraints: &CHA_CONSTRAINTS,
    ops: OpsKind::Cbox {
        init: BoxInit::Snbep,
        filter: &CHA_FILTER,
    },
    formats: &CHA_FORMATS,
    ..UncoreType::DEFAULT
};

pub static PCU: UncoreType = UncoreType {
    name: "pcu",
    num_counters: 4,
    perf_ctr: msr::PCU_PMON_CTR0,
    event_ctl: msr::PCU_PMON_CTL0,
    event_mask: PCU_RAW_EVENT_MASK,
    box_ctl: msr::PCU_PMON_BOX_CTL,
    formats: &PCU_FORMATS,
    ..UncoreType::DEFAULT
};

const MEMORY_COMMON: UncoreType = UncoreType {
    access: Access::Pci,
    num_counters: 4,
    fixed_ctr_bits: 48,
    event_mask: snbep::RAW_EVENT_MASK,
    ops: OpsKind::KnlImc,
    formats: &[],
    ..UncoreType::DEFAULT
};

pub static IMC_UCLK: UncoreType = UncoreType {
    name: "imc_uclk",
    num_boxes: 2,
    perf_ctr: pci::MC0_CH0_MSR_PMON_CTR0_LOW,
    event_ctl: pci::MC0_CH0_MSR_PMON_CTL0,
    fixed_ctr: pci::MC0_CH0_MSR_PMON_FIXED_LOW,
    fixed_ctl: pci::MC0_CH0_MSR_PMON_FIXED_CTL,
    box_ctl: pci::MC0_CH0_MSR_PMON_BOX_CTL,
    formats: &snbep::FORMATS,
    ..MEMORY_COMMON
};

pub static IMC_DCLK: UncoreType = UncoreType {
    name: "imc",
    num_boxes: 6,
    perf_ctr: pci::MC_DCLK_PMON_CTR0_LOW,
    event_ctl: pci::MC_DCLK_PMON_CTL0,
    fixed_ctr: pci::MC_DCLK_PMON_FIXED_LOW,
    fixed_ctl: pci::MC_DCLK_PMON_FIXED_CTL,
    box_ctl: pci::MC_DCLK_PMON_BOX_CTL,
    formats: &snbep::FORMATS,
    ..MEMORY_COMMON
};

pub static EDC_UCLK: UncoreType = UncoreType {
    name: "edc_uclk",
    num_boxes: 8,
    perf_ctr: pci::MC0_CH0_MSR_PMON_CTR0_LOW,
    event_ctl: pci::MC0_CH0_MSR_PMON_CTL0,
    fixed_ctr: pci::MC0_CH0_MSR_PMON_FIXED_LOW,
    fixed_ctl: pci::MC0_CH0_MSR_PMON_FIXED_CTL,
    box_ctl: pci::MC0_CH0_MSR_PMON_BOX_CTL,
    formats: &snbep::FORMATS,
    ..MEMORY_COMMON
};

pub static EDC_ECLK: UncoreType = UncoreType {
    name: "edc_eclk",
    num_boxes: 8,
    perf_ctr: pci::EDC_ECLK_PMON_CTR0_LOW,
    event_ctl: pci::EDC_ECLK_PMON_CTL0,
    fixed_ctr: pci::EDC_ECLK_PMON_FIXED_LOW,
    fixed_ctl: pci::EDC_ECLK_PMON_FIXED_CTL,
    box_ctl: pci::EDC_ECLK_PMON_BOX_CTL,
    formats: &snbep::FORMATS,
    ..MEMORY_COMMON
};

pub static M2PCIE: UncoreType = UncoreType {
    name: "m2pcie",
    constraints: &M2PCIE_CONSTRAINTS,
    formats: &snbep::FORMATS,
    ..snbep::PCI_COMMON
};

pub static IRP: UncoreType = UncoreType {
    name: "irp",
    access: Access::Pci,
    num_counters: 2,
    perf_ctr: snbep::pci::PMON_CTR0,
    event_ctl: snbep::pci::PMON_CTL0,
    event_mask: IRP_RAW_EVENT_MASK,
    box_ctl: pci::IRP_PCI_PMON_BOX_CTL,
    ops: OpsKind::Pci {
        init: BoxInit::Snbep,
    },
    formats: &IRP_FORMATS,
    ..UncoreType::DEFAULT
};

pub static MSR_UNCORES: [&UncoreType; 3] = [&UBOX, &CHA, &PCU];
pub static PCI_UNCORES: [&UncoreType; 6] =
    [&IMC_UCLK, &IMC_DCLK, &EDC_UCLK, &EDC_ECLK, &M2PCIE, &IRP];

const IMC_UCLK_IDX: usize = 0;
const IMC_DCLK_IDX: usize = 1;
const EDC_UCLK_IDX: usize = 2;
const EDC_ECLK_IDX: usize = 3;
const M2PCIE_IDX: usize = 4;
const IRP_IDX: usize = 5;

pub const IMC_UCLK_DEVICE_ID: u16 = 0x7841;
pub const IMC_DCLK_DEVICE_ID: u16 = 0x7843;
pub const EDC_UCLK_DEVICE_ID: u16 = 0x7833;
pub const EDC_ECLK_DEVICE_ID: u16 = 0x7835;
pub const M2PCIE_DEVICE_ID: u16 = 0x7817;
pub const IRP_DEVICE_ID: u16 = 0x7814;

pub static PCI_UNITS: [PciUnit; 26] = [
    PciUnit::at(IMC_UCLK_DEVICE_ID, (10, 0), IMC_UCLK_IDX, 0),
    PciUnit::at(IMC_UCLK_DEVICE_ID, (11, 0), IMC_UCLK_IDX, 1),
    PciUnit::at(IMC_DCLK_DEVICE_ID, (8, 2), IMC_DCLK_IDX, 0),
    PciUnit::at(IMC_DCLK_DEVICE_ID, (8, 3), IMC_DCLK_IDX, 1),
    PciUnit::at(IMC_DCLK_DEVICE_ID, (8, 4), IMC_DCLK_IDX, 2),
    PciUnit::at(IMC_DCLK_DEVICE_ID, (9, 2), IMC_DCLK_IDX, 3),
    PciUnit::at(IMC_DCLK_DEVICE_ID, (9, 3), IMC_DCLK_IDX, 4),
    PciUnit::at(IMC_DCLK_DEVICE_ID, (9, 4), IMC_DCLK_IDX, 5),
    PciUnit::at(EDC_UCLK_DEVICE_ID, (15, 0), EDC_UCLK_IDX, 0),
    PciUnit::at(EDC_UCLK_DEVICE_ID, (16, 0), EDC_UCLK_IDX, 1),
    PciUnit::at(EDC_UCLK_DEVICE_ID, (17, 0), EDC_UCLK_IDX, 2),
    PciUnit::at(EDC_UCLK_DEVICE_ID, (18, 0), EDC_UCLK_IDX, 3),
    PciUnit::at(EDC_UCLK_DEVICE_ID, (19, 0), EDC_UCLK_IDX, 4),
    PciUnit::at(EDC_UCLK_DEVICE_ID, (20, 0), EDC_UCLK_IDX, 5),
    PciUnit::at(EDC_UCLK_DEVICE_ID, (21, 0), EDC_UCLK_IDX, 6),
    PciUnit::at(EDC_UCLK_DEVICE_ID, (22, 0), EDC_UCLK_IDX, 7),
    PciUnit::at(EDC_ECLK_DEVICE_ID, (24, 2), EDC_ECLK_IDX, 0),
    PciUnit::at(EDC_ECLK_DEVICE_ID, (25, 2), EDC_ECLK_IDX, 1),
    PciUnit::at(EDC_ECLK_DEVICE_ID, (26, 2), EDC_ECLK_IDX, 2),
    PciUnit::at(EDC_ECLK_DEVICE_ID, (27, 2), EDC_ECLK_IDX, 3),
    PciUnit::at(EDC_ECLK_DEVICE_ID, (28, 2), EDC_ECLK_IDX, 4),
    PciUnit::at(EDC_ECLK_DEVICE_ID, (29, 2), EDC_ECLK_IDX, 5),
    PciUnit::at(EDC_ECLK_DEVICE_ID, (30, 2), EDC_ECLK_IDX, 6),
    PciUnit::at(EDC_ECLK_DEVICE_ID, (31, 2), EDC_ECLK_IDX, 7),
    PciUnit::new(M2PCIE_DEVICE_ID, M2PCIE_IDX, 0),
    PciUnit::new(IRP_DEVICE_ID, IRP_IDX, 0),
];

/// Devices whose bus is mapped to package 0
pub static SINGLE_SOCKET_DEVICES: [u16; 2] = [IRP_DEVICE_ID, M2PCIE_DEVICE_ID];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::extra_reg_fields;

    #[test]
    fn test_cha_filter_keeps_qualifiers() {
        assert_eq!(extra_reg_fields(&CHA_EXTRA_REGS, 0x0136), 0x4);
        assert_eq!(extra_reg_fields(&CHA_EXTRA_REGS, 0x3d | CTL_TID_EN), 0x3);
        assert_eq!(CHA_FILTER.register(2), 0xe1d);
        assert_eq!(CHA_FILTER.always_set, 0x23_0000_0000);
    }

    #[test]
    fn test_raw_event_masks() {
        assert_eq!(PCU_RAW_EVENT_MASK, 0xff8c_c0ff);
        assert_eq!(CHA_RAW_EVENT_MASK, 0xff8d_ffff);
    }

    #[test]
    fn test_memory_boxes_by_devfn() {
        let dclk: Vec<_> = PCI_UNITS
            .iter()
            .filter(|u| u.device_id == IMC_DCLK_DEVICE_ID)
            .collect();
        assert_eq!(dclk.len(), 6);
        assert!(dclk.iter().all(|u| u.devfn.is_some()));
        assert!(EDC_ECLK.has_fixed());
        assert_eq!(EDC_ECLK.fixed_ctl, 0xa44);
    }
}
