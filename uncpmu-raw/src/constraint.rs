//! Event constraints and event-to-filter mappings

use crate::register::bits::CTL_EV_SEL_MASK;
use crate::types::FIXED_COUNTER_INDEX;

/// Restricts which counter slots a raw event code may occupy
///
/// An event matches when `(config & cmask) == code`. `idxmsk` is the set of
/// allowed counter indices and `weight` its population count, which the
/// scheduler uses to place the most constrained events first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventConstraint {
    pub code: u64,
    pub cmask: u64,
    pub idxmsk: u64,
    pub weight: u32,
    /// The counter mask overlaps another constraint's mask without being a
    /// subset of it
    pub overlap: bool,
}

impl EventConstraint {
    pub const fn new(code: u64, idxmsk: u64, cmask: u64, overlap: bool) -> Self {
        Self {
            code,
            cmask,
            idxmsk,
            weight: idxmsk.count_ones(),
            overlap,
        }
    }

    /// Constraint keyed on the 8-bit event select only
    pub const fn uncore(code: u64, idxmsk: u64) -> Self {
        Self::new(code, idxmsk, CTL_EV_SEL_MASK, false)
    }

    pub const fn uncore_overlap(code: u64, idxmsk: u64) -> Self {
        Self::new(code, idxmsk, CTL_EV_SEL_MASK, true)
    }

    /// No counter is acceptable: the allocation-conflict sentinel
    pub const EMPTY: Self = Self::new(0, 0, 0, false);

    /// The dedicated fixed counter slot
    pub const FIXED: Self = Self::new(!0, 1 << FIXED_COUNTER_INDEX, !0, false);

    /// Any of the first `num_counters` generic counters
    pub const fn unconstrained(num_counters: usize) -> Self {
        let idxmsk = if num_counters >= 64 {
            !0
        } else {
            (1u64 << num_counters) - 1
        };
        Self::new(0, idxmsk, 0, false)
    }

    pub fn matches(&self, config: u64) -> bool {
        config & self.cmask == self.code
    }

    pub fn is_empty(&self) -> bool {
        self.idxmsk == 0
    }

    pub fn allows(&self, idx: usize) -> bool {
        idx < 64 && self.idxmsk & (1 << idx) != 0
    }
}

/// Maps an event encoding onto the shared filter sub-fields it needs
///
/// `idx` is a bitmask of sub-field indices; several entries may match one
/// event and their masks are OR-ed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraReg {
    pub event: u64,
    pub config_mask: u64,
    pub idx: u32,
}

impl ExtraReg {
    pub const fn new(event: u64, config_mask: u64, idx: u32) -> Self {
        Self {
            event,
            config_mask,
            idx,
        }
    }

    pub fn matches(&self, config: u64) -> bool {
        config & self.config_mask == self.event
    }
}

/// Linear scan of an extra-reg table, OR-ing the sub-fields of every match
pub fn extra_reg_fields(table: &[ExtraReg], config: u64) -> u32 {
    table
        .iter()
        .filter(|er| er.matches(config))
        .fold(0, |fields, er| fields | er.idx)
}

/// First constraint in `table` matching `config`
pub fn lookup_constraint(table: &[EventConstraint], config: u64) -> Option<&EventConstraint> {
    table.iter().find(|c| c.matches(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_weight() {
        let c = EventConstraint::uncore(0x1f, 0xe);
        assert_eq!(c.weight, 3);
        assert!(c.matches(0x031f));
        assert!(!c.matches(0x0320));
        assert!(c.allows(1));
        assert!(!c.allows(0));
    }

    #[test]
    fn test_empty_and_fixed() {
        assert!(EventConstraint::EMPTY.is_empty());
        assert_eq!(EventConstraint::EMPTY.weight, 0);
        assert!(EventConstraint::FIXED.allows(FIXED_COUNTER_INDEX));
        assert_eq!(EventConstraint::unconstrained(4).idxmsk, 0xf);
    }

    #[test]
    fn test_extra_reg_fields_or_all_matches() {
        let table = [
            ExtraReg::new(1 << 19, 1 << 19, 0x1),
            ExtraReg::new(0x4134, 0xffff, 0x6),
            ExtraReg::new(0x4037, 0x40ff, 0x2),
        ];
        assert_eq!(extra_reg_fields(&table, 0x4134), 0x6);
        assert_eq!(extra_reg_fields(&table, 0x4134 | (1 << 19)), 0x7);
        assert_eq!(extra_reg_fields(&table, 0x7f37), 0x2);
        assert_eq!(extra_reg_fields(&table, 0x0011), 0);
    }
}
