//! Shared filter register allocation
//!
//! Three allocators hand out the filter registers that several events of
//! one box may need at once:
//!
//! * cbox/CHA: up to five independent sub-fields of one register, each with
//!   its own reference count. Sub-fields are claimed in increasing order and
//!   a conflict releases what this attempt took.
//! * PCU: one byte-wide band value that may sit in any of four byte lanes.
//!   On conflict the value is moved to the next lane; a successful move is
//!   written back into the event.
//! * generic: the whole register, shared when `config1` and `config2` match.
//!
//! Fake boxes own their own registers and never record claims in the event,
//! so probing a hypothetical schedule leaves the real box and the event
//! untouched.

use parking_lot::Mutex;
use uncpmu_raw::{CboxFilter, OpsKind};

use crate::config::RefLimitPolicy;
use crate::uncore::event::HwEvent;

pub const MAX_SHARED_FIELDS: usize = 5;

const CBOX_FIELDS: usize = 5;
const CBOX_FIELD_BITS: u32 = 6;
const PCU_LANES: u32 = 4;
const PCU_LANE_BITS: u32 = 8;
const GENERIC_REF_BITS: u32 = 32;

/// Contents of one shared register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SharedRegSnapshot {
    pub config: u64,
    pub config2: u64,
    /// Reference count per sub-field (cbox), per lane (PCU) or in slot 0
    /// for a whole register
    pub refs: [u32; MAX_SHARED_FIELDS],
}

#[derive(Debug, Default)]
pub struct SharedReg {
    inner: Mutex<SharedRegSnapshot>,
}

impl SharedReg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SharedRegSnapshot {
        *self.inner.lock()
    }

    /// Value to program into the filter register
    pub fn config(&self) -> u64 {
        self.inner.lock().config
    }
}

/// Result of a shared register claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The event needs no shared register, or already holds its claim
    NotNeeded,
    Granted,
    /// PCU band value moved from one byte lane to another
    Relocated { from: u32, to: u32 },
    Conflict,
}

impl ClaimOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClaimOutcome::Conflict)
    }
}

fn under_limit(refs: u32, bits: u32, policy: RefLimitPolicy) -> bool {
    match policy {
        RefLimitPolicy::Unbounded => true,
        RefLimitPolicy::Enforce if bits >= 32 => refs < u32::MAX,
        RefLimitPolicy::Enforce => {
            let ok = refs < (1 << bits) - 1;
            if !ok {
                tracing::warn!("Shared register field saturated at {} claims", refs);
            }
            ok
        }
    }
}

/// Allocator used by a type's shared registers
#[derive(Debug, Clone, Copy)]
pub enum SharedRegAllocator {
    None,
    Cbox(&'static CboxFilter),
    Pcu,
    Generic,
}

impl SharedRegAllocator {
    pub fn for_ops(ops: &OpsKind) -> Self {
        match *ops {
            OpsKind::Cbox { filter, .. } => SharedRegAllocator::Cbox(filter),
            OpsKind::Pcu { .. } => SharedRegAllocator::Pcu,
            OpsKind::Ubox { .. } | OpsKind::Qpi { .. } => SharedRegAllocator::Generic,
            OpsKind::Msr { .. } | OpsKind::Pci { .. } | OpsKind::KnlImc => SharedRegAllocator::None,
        }
    }

    pub fn get(
        &self,
        regs: &[SharedReg],
        hw: &mut HwEvent,
        fake: bool,
        policy: RefLimitPolicy,
    ) -> ClaimOutcome {
        let Some(reg0) = regs.first() else {
            return ClaimOutcome::NotNeeded;
        };
        match self {
            SharedRegAllocator::None => ClaimOutcome::NotNeeded,
            SharedRegAllocator::Cbox(filter) => cbox_get(reg0, hw, filter, fake, policy),
            SharedRegAllocator::Pcu => pcu_get(reg0, hw, fake, policy),
            SharedRegAllocator::Generic => generic_get(regs, hw, fake, policy),
        }
    }

    pub fn put(&self, regs: &[SharedReg], hw: &mut HwEvent, fake: bool) {
        let Some(reg0) = regs.first() else {
            return;
        };
        match self {
            SharedRegAllocator::None => {}
            SharedRegAllocator::Cbox(_) => cbox_put(reg0, hw, fake),
            SharedRegAllocator::Pcu => pcu_put(reg0, hw, fake),
            SharedRegAllocator::Generic => generic_put(regs, hw, fake),
        }
    }
}

pub fn cbox_get(
    reg: &SharedReg,
    hw: &mut HwEvent,
    filter: &CboxFilter,
    fake: bool,
    policy: RefLimitPolicy,
) -> ClaimOutcome {
    let reg1 = &mut hw.extra_reg;
    let Some(fields) = reg1.idx else {
        return ClaimOutcome::NotNeeded;
    };

    let mut alloc = 0u32;
    let mut failed_at = None;
    {
        let mut er = reg.inner.lock();
        for i in 0..CBOX_FIELDS {
            let bit = 1u32 << i;
            if fields & bit == 0 {
                continue;
            }
            if !fake && reg1.alloc & bit != 0 {
                continue;
            }

            let mask = filter.mask(bit);
            let refs = er.refs[i];
            if (refs == 0 || (reg1.config ^ er.config) & mask == 0)
                && under_limit(refs, CBOX_FIELD_BITS, policy)
            {
                er.refs[i] += 1;
                er.config = (er.config & !mask) | (reg1.config & mask);
                alloc |= bit;
            } else {
                failed_at = Some(i);
                break;
            }
        }

        if let Some(failed) = failed_at {
            for i in (0..=failed).rev() {
                if alloc & (1 << i) != 0 {
                    er.refs[i] -= 1;
                }
            }
        }
    }

    if let Some(failed) = failed_at {
        tracing::debug!(
            "cbox filter field {} conflict (want 0x{:x}, fields 0x{:x})",
            failed,
            reg1.config,
            fields
        );
        return ClaimOutcome::Conflict;
    }

    if !fake {
        reg1.alloc |= alloc;
    }
    if alloc == 0 {
        ClaimOutcome::NotNeeded
    } else {
        ClaimOutcome::Granted
    }
}

pub fn cbox_put(reg: &SharedReg, hw: &mut HwEvent, fake: bool) {
    if fake {
        return;
    }
    let reg1 = &mut hw.extra_reg;
    let mut er = reg.inner.lock();
    for i in 0..CBOX_FIELDS {
        if reg1.alloc & (1 << i) != 0 {
            er.refs[i] = er.refs[i].saturating_sub(1);
        }
    }
    reg1.alloc = 0;
}

fn pcu_lane_mask(lane: u32) -> u64 {
    0xff << (lane * 8)
}

/// Band value moved into `new_lane`; with `modify` the event follows it
fn pcu_alter(hw: &mut HwEvent, new_lane: u32, modify: bool) -> u64 {
    let old_lane = hw.extra_reg.idx.unwrap_or(0);
    let config = if new_lane > old_lane {
        hw.extra_reg.config << (8 * (new_lane - old_lane))
    } else {
        hw.extra_reg.config >> (8 * (old_lane - new_lane))
    };

    if modify {
        // The band event select moves with its lane
        hw.config = hw
            .config
            .wrapping_add(u64::from(new_lane))
            .wrapping_sub(u64::from(old_lane));
        hw.extra_reg.config = config;
        hw.extra_reg.idx = Some(new_lane);
    }
    config
}

pub fn pcu_get(
    reg: &SharedReg,
    hw: &mut HwEvent,
    fake: bool,
    policy: RefLimitPolicy,
) -> ClaimOutcome {
    let Some(start) = hw.extra_reg.idx else {
        return ClaimOutcome::NotNeeded;
    };
    if !fake && hw.extra_reg.alloc != 0 {
        return ClaimOutcome::NotNeeded;
    }

    let mut lane = start;
    let mut config1 = hw.extra_reg.config;
    loop {
        let mask = pcu_lane_mask(lane);
        let claimed = {
            let mut er = reg.inner.lock();
            let refs = er.refs[lane as usize];
            if (refs == 0 || (config1 ^ er.config) & mask == 0)
                && under_limit(refs, PCU_LANE_BITS, policy)
            {
                er.refs[lane as usize] += 1;
                er.config = (er.config & !mask) | (config1 & mask);
                true
            } else {
                false
            }
        };

        if claimed {
            break;
        }

        lane = (lane + 1) % PCU_LANES;
        if lane == start {
            tracing::debug!("pcu band filter: every lane taken");
            return ClaimOutcome::Conflict;
        }
        config1 = pcu_alter(hw, lane, false);
    }

    if fake {
        return ClaimOutcome::Granted;
    }

    hw.extra_reg.alloc = 1;
    if lane != start {
        pcu_alter(hw, lane, true);
        tracing::debug!("pcu band filter moved from lane {} to {}", start, lane);
        return ClaimOutcome::Relocated {
            from: start,
            to: lane,
        };
    }
    ClaimOutcome::Granted
}

pub fn pcu_put(reg: &SharedReg, hw: &mut HwEvent, fake: bool) {
    if fake || hw.extra_reg.alloc == 0 {
        return;
    }
    if let Some(lane) = hw.extra_reg.idx {
        let mut er = reg.inner.lock();
        er.refs[lane as usize] = er.refs[lane as usize].saturating_sub(1);
    }
    hw.extra_reg.alloc = 0;
}

pub fn generic_get(
    regs: &[SharedReg],
    hw: &mut HwEvent,
    fake: bool,
    policy: RefLimitPolicy,
) -> ClaimOutcome {
    let Some(idx) = hw.extra_reg.idx else {
        return ClaimOutcome::NotNeeded;
    };
    if !fake && hw.extra_reg.alloc != 0 {
        return ClaimOutcome::NotNeeded;
    }
    let Some(reg) = regs.get(idx as usize) else {
        tracing::warn!("Event references shared register {} the box lacks", idx);
        return ClaimOutcome::Conflict;
    };

    let ok = {
        let mut er = reg.inner.lock();
        if (er.refs[0] == 0
            || (er.config == hw.extra_reg.config && er.config2 == hw.branch_reg.config))
            && under_limit(er.refs[0], GENERIC_REF_BITS, policy)
        {
            er.refs[0] += 1;
            er.config = hw.extra_reg.config;
            er.config2 = hw.branch_reg.config;
            true
        } else {
            false
        }
    };

    if !ok {
        tracing::debug!("shared register {} holds a different filter", idx);
        return ClaimOutcome::Conflict;
    }
    if !fake {
        hw.extra_reg.alloc = 1;
    }
    ClaimOutcome::Granted
}

pub fn generic_put(regs: &[SharedReg], hw: &mut HwEvent, fake: bool) {
    if fake || hw.extra_reg.alloc == 0 {
        return;
    }
    if let Some(reg) = hw.extra_reg.idx.and_then(|idx| regs.get(idx as usize)) {
        let mut er = reg.inner.lock();
        er.refs[0] = er.refs[0].saturating_sub(1);
    }
    hw.extra_reg.alloc = 0;
}
