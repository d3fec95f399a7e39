//! Register address resolution for one box
//!
//! A return value of 0 means the box has no such register.

use uncpmu_raw::{Access, UncoreType};

/// Where one box's registers live
#[derive(Debug, Clone, Copy)]
pub struct BoxRegisters {
    pub ty: &'static UncoreType,
    pub index: usize,
    /// PCI event controls are 8 bytes apart instead of 4
    pub ctl_offs8: bool,
}

impl BoxRegisters {
    pub fn new(ty: &'static UncoreType, index: usize) -> Self {
        Self {
            ty,
            index,
            ctl_offs8: false,
        }
    }

    fn msr_box_offset(&self) -> u32 {
        self.ty.box_offset.offset(self.index)
    }

    fn msr_counter_step(&self, idx: usize) -> u32 {
        let idx = idx as u32;
        if self.ty.pair_ctr_ctl {
            2 * idx
        } else {
            idx
        }
    }

    pub fn box_ctl(&self) -> u32 {
        match self.ty.access {
            Access::Pci => self.ty.box_ctl,
            Access::Msr if self.ty.box_ctl == 0 => 0,
            Access::Msr => self.ty.box_ctl + self.msr_box_offset(),
        }
    }

    pub fn fixed_ctl(&self) -> u32 {
        match self.ty.access {
            Access::Pci => self.ty.fixed_ctl,
            Access::Msr if self.ty.fixed_ctl == 0 => 0,
            Access::Msr => self.ty.fixed_ctl + self.msr_box_offset(),
        }
    }

    pub fn fixed_ctr(&self) -> u32 {
        match self.ty.access {
            Access::Pci => self.ty.fixed_ctr,
            Access::Msr if self.ty.fixed_ctr == 0 => 0,
            Access::Msr => self.ty.fixed_ctr + self.msr_box_offset(),
        }
    }

    pub fn event_ctl(&self, idx: usize) -> u32 {
        if let Some(table) = self.ty.event_ctl_table {
            return table.get(idx).copied().unwrap_or(0);
        }
        match self.ty.access {
            Access::Pci => {
                let stride = if self.ctl_offs8 { 8 } else { 4 };
                self.ty.event_ctl + idx as u32 * stride
            }
            Access::Msr => self.ty.event_ctl + self.msr_counter_step(idx) + self.msr_box_offset(),
        }
    }

    pub fn perf_ctr(&self, idx: usize) -> u32 {
        if let Some(table) = self.ty.perf_ctr_table {
            return table.get(idx).copied().unwrap_or(0);
        }
        match self.ty.access {
            Access::Pci => self.ty.perf_ctr + idx as u32 * 8,
            Access::Msr => self.ty.perf_ctr + self.msr_counter_step(idx) + self.msr_box_offset(),
        }
    }

    /// Counter width of slot `idx`
    pub fn counter_bits(&self, fixed: bool) -> u32 {
        if fixed {
            self.ty.fixed_ctr_bits
        } else {
            self.ty.perf_ctr_bits
        }
    }
}
