//! Uncore unit descriptors

use crate::constraint::{EventConstraint, ExtraReg};
use crate::format::{EventDesc, FormatAttr};

/// Generic counters a box can have at most
pub const MAX_GENERIC_COUNTERS: usize = 8;

/// Slot index reserved for the fixed counter
pub const FIXED_COUNTER_INDEX: usize = MAX_GENERIC_COUNTERS;

/// `attr.config` value selecting the fixed counter
pub const UNCORE_FIXED_EVENT: u64 = 0xff;

/// How a box's registers are reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Model-specific registers of a CPU in the package
    Msr,
    /// Configuration space of a per-box PCI function
    Pci,
}

/// Placement of consecutive MSR boxes of one type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxOffset {
    /// Box `i` sits at `base + i * stride`
    Uniform { stride: u32 },
    /// Box `i` sits at `base + table[i]`
    Table(&'static [u32]),
}

impl BoxOffset {
    pub fn offset(&self, index: usize) -> u32 {
        match self {
            BoxOffset::Uniform { stride } => stride * index as u32,
            BoxOffset::Table(offsets) => offsets.get(index).copied().unwrap_or(0),
        }
    }
}

/// Box-control value written when a box is first brought up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxInit {
    /// Reset control and counters, enable freeze
    Snbep,
    /// Reset control and counters
    Ivbep,
    /// Snbep value written one bit at a time, accumulating
    BitByBit,
    /// Ivbep value; event controls are 8 bytes apart
    IvbepCtlOffs8,
}

/// How a cbox filter value reaches hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterWrite {
    /// One 64-bit write to the filter register
    Single,
    /// Low 32 bits to the filter register, high 32 bits `high_offset` above
    Split { high_offset: u32 },
}

/// Layout of a cbox/CHA shared filter register
#[derive(Debug, Clone, Copy)]
pub struct CboxFilter {
    /// Filter register of box 0
    pub base: u32,
    /// Distance between the filter registers of consecutive boxes
    pub stride: u32,
    /// Event encodings that need filter sub-fields
    pub extra_regs: &'static [ExtraReg],
    /// Bit mask of each sub-field, indexed by sub-field number
    pub fields: &'static [u64],
    /// Bits always set once any sub-field is in use
    pub always_set: u64,
    pub write: FilterWrite,
}

impl CboxFilter {
    /// Combined bit mask of the sub-fields selected by `fields`
    pub fn mask(&self, fields: u32) -> u64 {
        self.fields
            .iter()
            .enumerate()
            .filter(|(i, _)| fields & (1 << i) != 0)
            .fold(0, |mask, (_, m)| mask | m)
    }

    pub fn register(&self, box_index: usize) -> u32 {
        self.base + self.stride * box_index as u32
    }
}

/// Behaviour family of a unit type
///
/// Each variant names the hook set the engine dispatches to; the data it
/// carries is the generation-specific part of those hooks.
#[derive(Debug, Clone, Copy)]
pub enum OpsKind {
    /// Plain MSR box
    Msr { init: BoxInit },
    /// Plain PCI box
    Pci { init: BoxInit },
    /// MSR box with a shared cbox/CHA filter
    Cbox {
        init: BoxInit,
        filter: &'static CboxFilter,
    },
    /// MSR box with four relocatable byte-lane band filters
    Pcu { init: BoxInit, filter_reg: u32 },
    /// MSR box with a single whole-register filter
    Ubox {
        init: BoxInit,
        filter_reg: u32,
        filter_mask: u64,
    },
    /// PCI box with packet match/mask registers on a companion device
    Qpi { init: BoxInit },
    /// KNL memory and EDC boxes
    KnlImc,
}

impl OpsKind {
    pub fn init(&self) -> BoxInit {
        match *self {
            OpsKind::Msr { init }
            | OpsKind::Pci { init }
            | OpsKind::Cbox { init, .. }
            | OpsKind::Pcu { init, .. }
            | OpsKind::Ubox { init, .. }
            | OpsKind::Qpi { init } => init,
            OpsKind::KnlImc => BoxInit::Snbep,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpsKind::Msr { .. } => "msr",
            OpsKind::Pci { .. } => "pci",
            OpsKind::Cbox { .. } => "cbox",
            OpsKind::Pcu { .. } => "pcu",
            OpsKind::Ubox { .. } => "ubox",
            OpsKind::Qpi { .. } => "qpi",
            OpsKind::KnlImc => "knl-imc",
        }
    }
}

/// One class of uncore unit on one processor generation
#[derive(Debug, Clone, Copy)]
pub struct UncoreType {
    pub name: &'static str,
    pub access: Access,
    pub num_counters: usize,
    pub num_boxes: usize,
    pub perf_ctr_bits: u32,
    pub fixed_ctr_bits: u32,
    pub perf_ctr: u32,
    pub event_ctl: u32,
    pub event_mask: u64,
    /// Extra valid bits above bit 32 of the raw config, stored shifted down
    pub event_mask_ext: u64,
    pub fixed_ctr: u32,
    pub fixed_ctl: u32,
    pub box_ctl: u32,
    pub box_offset: BoxOffset,
    /// Control and counter registers interleave at twice the stride
    pub pair_ctr_ctl: bool,
    /// Per-counter control offsets for boxes with irregular spacing
    pub event_ctl_table: Option<&'static [u32]>,
    /// Per-counter counter offsets for boxes with irregular spacing
    pub perf_ctr_table: Option<&'static [u32]>,
    pub num_shared_regs: usize,
    /// Only box 0 exposes the fixed counter
    pub single_fixed: bool,
    pub constraints: &'static [EventConstraint],
    pub ops: OpsKind,
    pub formats: &'static [FormatAttr],
    pub event_descs: &'static [EventDesc],
}

impl UncoreType {
    /// Base every table entry starts from
    pub const DEFAULT: UncoreType = UncoreType {
        name: "",
        access: Access::Msr,
        num_counters: 0,
        num_boxes: 1,
        perf_ctr_bits: 48,
        fixed_ctr_bits: 0,
        perf_ctr: 0,
        event_ctl: 0,
        event_mask: 0,
        event_mask_ext: 0,
        fixed_ctr: 0,
        fixed_ctl: 0,
        box_ctl: 0,
        box_offset: BoxOffset::Uniform { stride: 0 },
        pair_ctr_ctl: false,
        event_ctl_table: None,
        perf_ctr_table: None,
        num_shared_regs: 0,
        single_fixed: false,
        constraints: &[],
        ops: OpsKind::Msr {
            init: BoxInit::Snbep,
        },
        formats: &[],
        event_descs: &[],
    };

    pub fn has_fixed(&self) -> bool {
        self.fixed_ctl != 0
    }

    /// Counter slots an event may take, including the fixed one
    pub fn max_events(&self) -> usize {
        self.num_counters + usize::from(self.has_fixed())
    }

    /// Raw config bits the hardware accepts
    pub fn raw_event_mask(&self) -> u64 {
        self.event_mask | (self.event_mask_ext << 32)
    }

    pub fn unconstrained(&self) -> EventConstraint {
        EventConstraint::unconstrained(self.num_counters)
    }

    pub fn format(&self, name: &str) -> Option<&'static FormatAttr> {
        self.formats.iter().find(|f| f.name == name)
    }

    pub fn event_desc(&self, name: &str) -> Option<&'static EventDesc> {
        self.event_descs.iter().find(|d| d.name == name)
    }
}
