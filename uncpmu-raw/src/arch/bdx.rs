//! Broadwell-EP/DE uncore definitions
//!
//! Haswell-EP register layout with up to 24 cboxes and no SBOX. The PCU is
//! shared verbatim with Haswell-EP.

use super::{hswep, ivbep, snbep};
use crate::constraint::EventConstraint;
use crate::generation::{ExtraDevice, PciUnit};
use crate::types::{BoxInit, BoxOffset, OpsKind, UncoreType};

pub static CBOX_CONSTRAINTS: [EventConstraint; 4] = [
    EventConstraint::uncore(0x09, 0x3),
    EventConstraint::uncore(0x11, 0x1),
    EventConstraint::uncore(0x36, 0x1),
    EventConstraint::uncore(0x3e, 0x1),
];

pub static R2PCIE_CONSTRAINTS: [EventConstraint; 9] = [
    EventConstraint::uncore(0x10, 0x3),
    EventConstraint::uncore(0x11, 0x3),
    EventConstraint::uncore(0x13, 0x1),
    EventConstraint::uncore(0x23, 0x1),
    EventConstraint::uncore(0x25, 0x1),
    EventConstraint::uncore(0x26, 0x3),
    EventConstraint::uncore(0x28, 0x3),
    EventConstraint::uncore(0x2c, 0x3),
    EventConstraint::uncore(0x2d, 0x3),
];

pub static R3QPI_CONSTRAINTS: [EventConstraint; 30] = [
    EventConstraint::uncore(0x01, 0x7),
    EventConstraint::uncore(0x07, 0x7),
    EventConstraint::uncore(0x08, 0x7),
    EventConstraint::uncore(0x09, 0x7),
    EventConstraint::uncore(0x0a, 0x7),
    EventConstraint::uncore(0x0e, 0x7),
    EventConstraint::uncore(0x10, 0x3),
    EventConstraint::uncore(0x11, 0x3),
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
    EventConstraint::uncore(0x33, 0x3),
    EventConstraint::uncore(0x34, 0x3),
    EventConstraint::uncore(0x36, 0x3),
    EventConstraint::uncore(0x37, 0x3),
    EventConstraint::uncore(0x38, 0x3),
    EventConstraint::uncore(0x39, 0x3),
];

pub static UBOX: UncoreType = UncoreType {
    name: "ubox",
    num_counters: 2,
    fixed_ctr_bits: 48,
    perf_ctr: hswep::msr::U_PMON_CTR0,
    event_ctl: hswep::msr::U_PMON_CTL0,
    event_mask: snbep::U_RAW_EVENT_MASK,
    fixed_ctr: hswep::msr::U_PMON_UCLK_FIXED_CTR,
    fixed_ctl: hswep::msr::U_PMON_UCLK_FIXED_CTL,
    num_shared_regs: 1,
    ops: OpsKind::Msr {
        init: BoxInit::Ivbep,
    },
    formats: &ivbep::UBOX_FORMATS,
    ..UncoreType::DEFAULT
};

pub static CBOX: UncoreType = UncoreType {
    name: "cbox",
    num_counters: 4,
    num_boxes: 24,
    event_ctl: hswep::msr::C0_PMON_CTL0,
    perf_ctr: hswep::msr::C0_PMON_CTR0,
    event_mask: snbep::CBO_RAW_EVENT_MASK,
    box_ctl: hswep::msr::C0_PMON_BOX_CTL,
    box_offset: BoxOffset::Uniform {
        stride: hswep::msr::CBO_OFFSET,
    },
    num_shared_regs: 1,
    constraints: &CBOX_CONSTRAINTS,
    ops: OpsKind::Cbox {
        init: BoxInit::Snbep,
        filter: &hswep::CBOX_FILTER,
    },
    formats: &hswep::CBOX_FORMATS,
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
    event_descs: &hswep::IMC_EVENTS,
    formats: &snbep::FORMATS,
    ..snbep::PCI_COMMON
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
    constraints: &R3QPI_CONSTRAINTS,
    formats: &snbep::FORMATS,
    ..snbep::PCI_COMMON
};

pub static MSR_UNCORES: [&UncoreType; 3] = [&UBOX, &CBOX, &hswep::PCU];
pub static PCI_UNCORES: [&UncoreType; 6] = [&HA, &IMC, &hswep::IRP, &QPI, &R2PCIE, &R3QPI];

const HA_IDX: usize = 0;
const IMC_IDX: usize = 1;
const IRP_IDX: usize = 2;
const QPI_IDX: usize = 3;
const R2PCIE_IDX: usize = 4;
const R3QPI_IDX: usize = 5;

pub static PCI_UNITS: [PciUnit; 21] = [
    PciUnit::new(0x6f30, HA_IDX, 0),
    PciUnit::new(0x6f38, HA_IDX, 1),
    PciUnit::new(0x6fb0, IMC_IDX, 0),
    PciUnit::new(0x6fb1, IMC_IDX, 1),
    PciUnit::new(0x6fb4, IMC_IDX, 2),
    PciUnit::new(0x6fb5, IMC_IDX, 3),
    PciUnit::new(0x6fd0, IMC_IDX, 4),
    PciUnit::new(0x6fd1, IMC_IDX, 5),
    PciUnit::new(0x6fd4, IMC_IDX, 6),
    PciUnit::new(0x6fd5, IMC_IDX, 7),
    PciUnit::new(0x6f39, IRP_IDX, 0),
    PciUnit::new(0x6f32, QPI_IDX, 0),
    PciUnit::new(0x6f33, QPI_IDX, 1),
    PciUnit::new(0x6f3a, QPI_IDX, 2),
    PciUnit::new(0x6f34, R2PCIE_IDX, 0),
    PciUnit::new(0x6f36, R3QPI_IDX, 0),
    PciUnit::new(0x6f37, R3QPI_IDX, 1),
    PciUnit::new(0x6f3e, R3QPI_IDX, 2),
    PciUnit::extra(0x6f86, ExtraDevice::QpiPort0Filter),
    PciUnit::extra(0x6f96, ExtraDevice::QpiPort1Filter),
    PciUnit::extra(0x6f46, ExtraDevice::QpiPort2Filter),
];

pub const UBOX_DEVICE_ID: u16 = 0x6f1e;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::lookup_constraint;

    #[test]
    fn test_shares_haswell_pieces() {
        assert!(std::ptr::eq(MSR_UNCORES[2], &hswep::PCU));
        assert!(std::ptr::eq(PCI_UNCORES[2], &hswep::IRP));
        assert_eq!(CBOX.num_boxes, 24);
    }

    #[test]
    fn test_r3qpi_wider_counters() {
        assert_eq!(R3QPI.perf_ctr_bits, 48);
        assert_eq!(lookup_constraint(&R3QPI_CONSTRAINTS, 0x01).unwrap().idxmsk, 0x7);
    }
}
