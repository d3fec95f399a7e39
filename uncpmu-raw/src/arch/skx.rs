//! Skylake-SP uncore definitions
//!
//! The cbox becomes the CHA. Its count is not fixed by the model and is
//! taken from the number of CHA PCI functions on the first socket's bus.
//! IIO and IRP stacks move to MSRs. UPI and M2M boxes space their event
//! controls 8 bytes apart.
//!
//! ## References
//!
//! - Intel Xeon Processor Scalable Memory Family Uncore Performance
//!   Monitoring Reference Manual

use super::{hswep, ivbep, snbep};
use crate::constraint::{EventConstraint, ExtraReg};
use crate::format::{attrs::*, FormatAttr};
use crate::generation::PciUnit;
use crate::register::bits::*;
use crate::types::{Access, BoxInit, BoxOffset, CboxFilter, FilterWrite, OpsKind, UncoreType};

/// Register addresses
pub mod msr {
    pub const IIO0_PMON_CTL0: u32 = 0xa48;
    pub const IIO0_PMON_CTR0: u32 = 0xa41;
    pub const IIO0_PMON_BOX_CTL: u32 = 0xa40;
    pub const IIO_OFFSET: u32 = 0x20;

    pub const IRP0_PMON_CTL0: u32 = 0xa5b;
    pub const IRP0_PMON_CTR0: u32 = 0xa59;
    pub const IRP0_PMON_BOX_CTL: u32 = 0xa58;
    pub const IRP_OFFSET: u32 = 0x20;
}

/// PCI configuration space offsets
pub mod pci {
    pub const UPI_PMON_CTL0: u32 = 0x350;
    pub const UPI_PMON_CTR0: u32 = 0x318;
    pub const UPI_PMON_BOX_CTL: u32 = 0x378;

    pub const M2M_PMON_CTL0: u32 = 0x228;
    pub const M2M_PMON_CTR0: u32 = 0x200;
    pub const M2M_PMON_BOX_CTL: u32 = 0x258;

    pub const CPUNODEID: u32 = 0xc0;
    pub const GIDNIDMAP: u32 = 0xd4;
}

pub const PMON_CTL_TRESH_MASK: u64 = 0xff << 24;
pub const PMON_CTL_TRESH_MASK_EXT: u64 = 0xf;
pub const PMON_CTL_CH_MASK: u64 = 0xff << 4;
pub const PMON_CTL_FC_MASK: u64 = 0x7 << 12;
pub const PMON_CTL_UMASK_EXT: u64 = 0xff;

pub const IIO_RAW_EVENT_MASK: u64 =
    CTL_EV_SEL_MASK | CTL_UMASK_MASK | CTL_EDGE_DET | CTL_INVERT | PMON_CTL_TRESH_MASK;
pub const IIO_RAW_EVENT_MASK_EXT: u64 =
    PMON_CTL_TRESH_MASK_EXT | PMON_CTL_CH_MASK | PMON_CTL_FC_MASK;

/// Default CHA count, replaced at bring-up by the counted PCI functions
pub const MAX_CHA: usize = 28;

/// One PCI function of this id exists per CHA
pub const CHA_DEVICE_ID: u16 = 0x208d;

pub const UBOX_DEVICE_ID: u16 = 0x2014;

/// tid, link, state
pub static CHA_FILTER_FIELDS: [u64; 3] = [0x1ff, 0xf << 9, 0x3ff << 17];

pub static CHA_EXTRA_REGS: [ExtraReg; 6] = [
    ExtraReg::new(0x0334, 0xffff, 0x4),
    ExtraReg::new(0x0534, 0xffff, 0x4),
    ExtraReg::new(0x0934, 0xffff, 0x4),
    ExtraReg::new(0x1134, 0xffff, 0x4),
    ExtraReg::new(0x2134, 0xffff, 0x4),
    ExtraReg::new(0x8134, 0xffff, 0x4),
];

pub static CHA_FILTER: CboxFilter = CboxFilter {
    base: hswep::msr::C0_PMON_BOX_FILTER0,
    stride: hswep::msr::CBO_OFFSET,
    extra_regs: &CHA_EXTRA_REGS,
    fields: &CHA_FILTER_FIELDS,
    always_set: 0,
    write: FilterWrite::Split { high_offset: 1 },
};

pub static CHA_CONSTRAINTS: [EventConstraint; 2] = [
    EventConstraint::uncore(0x11, 0x1),
    EventConstraint::uncore(0x36, 0x1),
];

pub static IIO_CONSTRAINTS: [EventConstraint; 6] = [
    EventConstraint::uncore(0x83, 0x3),
    EventConstraint::uncore(0x88, 0xc),
    EventConstraint::uncore(0x95, 0xc),
    EventConstraint::uncore(0xc0, 0xc),
    EventConstraint::uncore(0xc5, 0xc),
    EventConstraint::uncore(0xd4, 0xc),
];

pub static M2PCIE_CONSTRAINTS: [EventConstraint; 1] = [EventConstraint::uncore(0x23, 0x3)];

pub static M3UPI_CONSTRAINTS: [EventConstraint; 8] = [
    EventConstraint::uncore(0x1d, 0x1),
    EventConstraint::uncore(0x1e, 0x1),
    EventConstraint::uncore(0x40, 0x7),
    EventConstraint::uncore(0x4e, 0x7),
    EventConstraint::uncore(0x4f, 0x7),
    EventConstraint::uncore(0x50, 0x7),
    EventConstraint::uncore(0x51, 0x7),
    EventConstraint::uncore(0x52, 0x7),
];

pub static FORMATS: [FormatAttr; 5] = [EVENT, UMASK, EDGE, INV, THRESH8];
pub static CHA_FORMATS: [FormatAttr; 19] = [
    EVENT,
    UMASK,
    EDGE,
    TID_EN,
    INV,
    THRESH8,
    FILTER_TID4,
    FILTER_LINK4,
    FILTER_STATE5,
    FILTER_REM,
    FILTER_LOC,
    FILTER_NM,
    FILTER_ALL_OP,
    FILTER_NOT_NM,
    FILTER_OPC_0,
    FILTER_OPC_1,
    FILTER_NC,
    FILTER_C6,
    FILTER_ISOC,
];
pub static IIO_FORMATS: [FormatAttr; 7] = [EVENT, UMASK, EDGE, INV, THRESH9, CH_MASK, FC_MASK];
pub static UPI_FORMATS: [FormatAttr; 5] = [EVENT_EXT, UMASK_EXT, EDGE, INV, THRESH8];

pub static UBOX: UncoreType = UncoreType {
    name: "ubox",
    num_counters: 2,
    fixed_ctr_bits: 48,
    perf_ctr: hswep::msr::U_PMON_CTR0,
    event_ctl: hswep::msr::U_PMON_CTL0,
    event_mask: snbep::U_RAW_EVENT_MASK,
    fixed_ctr: hswep::msr::U_PMON_UCLK_FIXED_CTR,
    fixed_ctl: hswep::msr::U_PMON_UCLK_FIXED_CTL,
    ops: OpsKind::Msr {
        init: BoxInit::Ivbep,
    },
    formats: &ivbep::UBOX_FORMATS,
    ..UncoreType::DEFAULT
};

pub static CHA: UncoreType = UncoreType {
    name: "cha",
    num_counters: 4,
    num_boxes: MAX_CHA,
    event_ctl: hswep::msr::C0_PMON_CTL0,
    perf_ctr: hswep::msr::C0_PMON_CTR0,
    event_mask: hswep::S_RAW_EVENT_MASK,
    box_ctl: hswep::msr::C0_PMON_BOX_CTL,
    box_offset: BoxOffset::Uniform {
        stride: hswep::msr::CBO_OFFSET,
    },
    num_shared_regs: 1,
    constraints: &CHA_CONSTRAINTS,
    // no freeze-enable bit in the CHA box control
    ops: OpsKind::Cbox {
        init: BoxInit::Ivbep,
        filter: &CHA_FILTER,
    },
    formats: &CHA_FORMATS,
    ..UncoreType::DEFAULT
};

pub static IIO: UncoreType = UncoreType {
    name: "iio",
    num_counters: 4,
    num_boxes: 5,
    event_ctl: msr::IIO0_PMON_CTL0,
    perf_ctr: msr::IIO0_PMON_CTR0,
    event_mask: IIO_RAW_EVENT_MASK,
    event_mask_ext: IIO_RAW_EVENT_MASK_EXT,
    box_ctl: msr::IIO0_PMON_BOX_CTL,
    box_offset: BoxOffset::Uniform {
        stride: msr::IIO_OFFSET,
    },
    constraints: &IIO_CONSTRAINTS,
    ops: OpsKind::Msr {
        init: BoxInit::Ivbep,
    },
    formats: &IIO_FORMATS,
    ..UncoreType::DEFAULT
};

pub static IRP: UncoreType = UncoreType {
    name: "irp",
    num_counters: 2,
    num_boxes: 5,
    event_ctl: msr::IRP0_PMON_CTL0,
    perf_ctr: msr::IRP0_PMON_CTR0,
    event_mask: snbep::RAW_EVENT_MASK,
    box_ctl: msr::IRP0_PMON_BOX_CTL,
    box_offset: BoxOffset::Uniform {
        stride: msr::IRP_OFFSET,
    },
    ops: OpsKind::Msr {
        init: BoxInit::Ivbep,
    },
    formats: &FORMATS,
    ..UncoreType::DEFAULT
};

pub static PCU: UncoreType = UncoreType {
    name: "pcu",
    num_counters: 4,
    perf_ctr: hswep::msr::PCU_PMON_CTR0,
    event_ctl: hswep::msr::PCU_PMON_CTL0,
    event_mask: snbep::PCU_RAW_EVENT_MASK,
    box_ctl: hswep::msr::PCU_PMON_BOX_CTL,
    num_shared_regs: 1,
    ops: OpsKind::Pcu {
        init: BoxInit::Ivbep,
        filter_reg: hswep::msr::PCU_PMON_BOX_FILTER,
    },
    formats: &snbep::PCU_FORMATS,
    ..UncoreType::DEFAULT
};

const PCI_COMMON: UncoreType = UncoreType {
    access: Access::Pci,
    num_counters: 4,
    perf_ctr: snbep::pci::PMON_CTR0,
    event_ctl: snbep::pci::PMON_CTL0,
    event_mask: snbep::RAW_EVENT_MASK,
    box_ctl: snbep::pci::PMON_BOX_CTL,
    ops: OpsKind::Pci {
        init: BoxInit::Ivbep,
    },
    formats: &[],
    ..UncoreType::DEFAULT
};

pub static IMC: UncoreType = UncoreType {
    name: "imc",
    num_boxes: 6,
    fixed_ctr_bits: 48,
    fixed_ctr: snbep::pci::MC_CHY_FIXED_CTR,
    fixed_ctl: snbep::pci::MC_CHY_FIXED_CTL,
    event_descs: &hswep::IMC_EVENTS,
    formats: &FORMATS,
    ..PCI_COMMON
};

pub static M2M: UncoreType = UncoreType {
    name: "m2m",
    num_boxes: 2,
    perf_ctr: pci::M2M_PMON_CTR0,
    event_ctl: pci::M2M_PMON_CTL0,
    box_ctl: pci::M2M_PMON_BOX_CTL,
    ops: OpsKind::Pci {
        init: BoxInit::IvbepCtlOffs8,
    },
    formats: &FORMATS,
    ..PCI_COMMON
};

pub static UPI: UncoreType = UncoreType {
    name: "upi",
    num_boxes: 3,
    perf_ctr: pci::UPI_PMON_CTR0,
    event_ctl: pci::UPI_PMON_CTL0,
    event_mask: snbep::QPI_RAW_EVENT_MASK,
    event_mask_ext: PMON_CTL_UMASK_EXT,
    box_ctl: pci::UPI_PMON_BOX_CTL,
    ops: OpsKind::Pci {
        init: BoxInit::IvbepCtlOffs8,
    },
    formats: &UPI_FORMATS,
    ..PCI_COMMON
};

pub static M2PCIE: UncoreType = UncoreType {
    name: "m2pcie",
    num_boxes: 4,
    constraints: &M2PCIE_CONSTRAINTS,
    formats: &FORMATS,
    ..PCI_COMMON
};

pub static M3UPI: UncoreType = UncoreType {
    name: "m3upi",
    num_counters: 3,
    num_boxes: 3,
    constraints: &M3UPI_CONSTRAINTS,
    formats: &FORMATS,
    ..PCI_COMMON
};

/// Index of the CHA entry in [`MSR_UNCORES`]
pub const CHA_TYPE_INDEX: usize = 1;

pub static MSR_UNCORES: [&UncoreType; 5] = [&UBOX, &CHA, &IIO, &IRP, &PCU];
pub static PCI_UNCORES: [&UncoreType; 5] = [&IMC, &M2M, &UPI, &M2PCIE, &M3UPI];

const IMC_IDX: usize = 0;
const M2M_IDX: usize = 1;
const UPI_IDX: usize = 2;
const M2PCIE_IDX: usize = 3;
const M3UPI_IDX: usize = 4;

pub static PCI_UNITS: [PciUnit; 18] = [
    PciUnit::at(0x2042, (10, 2), IMC_IDX, 0),
    PciUnit::at(0x2046, (10, 6), IMC_IDX, 1),
    PciUnit::at(0x204a, (11, 2), IMC_IDX, 2),
    PciUnit::at(0x2042, (12, 2), IMC_IDX, 3),
    PciUnit::at(0x2046, (12, 6), IMC_IDX, 4),
    PciUnit::at(0x204a, (13, 2), IMC_IDX, 5),
    PciUnit::at(0x2066, (8, 0), M2M_IDX, 0),
    PciUnit::at(0x2066, (9, 0), M2M_IDX, 1),
    PciUnit::at(0x2058, (14, 0), UPI_IDX, 0),
    PciUnit::at(0x2058, (15, 0), UPI_IDX, 1),
    PciUnit::at(0x2058, (16, 0), UPI_IDX, 2),
    PciUnit::at(0x2088, (21, 1), M2PCIE_IDX, 0),
    PciUnit::at(0x2088, (22, 1), M2PCIE_IDX, 1),
    PciUnit::at(0x2088, (23, 1), M2PCIE_IDX, 2),
    PciUnit::at(0x2088, (21, 5), M2PCIE_IDX, 3),
    PciUnit::at(0x204c, (18, 0), M3UPI_IDX, 0),
    PciUnit::at(0x204d, (18, 1), M3UPI_IDX, 1),
    PciUnit::at(0x204c, (18, 4), M3UPI_IDX, 2),
];
