//! Counter constraints and event-to-counter assignment

use uncpmu_raw::constraint::lookup_constraint;
use uncpmu_raw::format::RawConfig;
use uncpmu_raw::{EventConstraint, UNCORE_FIXED_EVENT};

use crate::error::{Result, UncpmuError};
use crate::uncore::box_state::{next_event_id, BoxTarget, UncoreBox, UNCORE_PMC_IDX_MAX};
use crate::uncore::event::UncoreEvent;
use crate::uncore::ops::hw_config;

/// Place every event on a distinct allowed counter
///
/// Events are tried in order of increasing constraint weight, ties in list
/// order, each taking the lowest free counter it allows; dead ends
/// backtrack.
pub fn schedule(constraints: &[EventConstraint]) -> Option<Vec<usize>> {
    fn place(
        pos: usize,
        order: &[usize],
        constraints: &[EventConstraint],
        used: u64,
        assign: &mut [usize],
    ) -> bool {
        let Some(&i) = order.get(pos) else {
            return true;
        };
        for idx in 0..UNCORE_PMC_IDX_MAX {
            if used & (1 << idx) != 0 || !constraints[i].allows(idx) {
                continue;
            }
            assign[i] = idx;
            if place(pos + 1, order, constraints, used | (1 << idx), assign) {
                return true;
            }
        }
        false
    }

    let mut order: Vec<usize> = (0..constraints.len()).collect();
    order.sort_by_key(|&i| constraints[i].weight);

    let mut assign = vec![0; constraints.len()];
    place(0, &order, constraints, 0, &mut assign).then_some(assign)
}

/// Keep every event on its current counter if that is still legal
fn keep_current(events: &[UncoreEvent], constraints: &[EventConstraint]) -> Option<Vec<usize>> {
    let mut used = 0u64;
    let mut assign = Vec::with_capacity(events.len());
    for (event, c) in events.iter().zip(constraints) {
        let idx = event.hw.idx?;
        if !c.allows(idx) || used & (1 << idx) != 0 {
            return None;
        }
        used |= 1 << idx;
        assign.push(idx);
    }
    Some(assign)
}

impl UncoreBox {
    /// Counters `event` may use on this box, claiming its shared
    /// registers as a side effect
    pub fn get_event_constraint(&self, event: &mut UncoreEvent) -> EventConstraint {
        let outcome = self
            .allocator()
            .get(self.shared_regs(), &mut event.hw, self.is_fake(), self.policy());
        if outcome.is_conflict() {
            return EventConstraint::EMPTY;
        }
        if event.attr.config == UNCORE_FIXED_EVENT {
            return EventConstraint::FIXED;
        }
        lookup_constraint(self.ty().constraints, event.hw.config)
            .copied()
            .unwrap_or_else(|| self.ty().unconstrained())
    }

    pub fn put_event_constraint(&self, event: &mut UncoreEvent) {
        self.allocator()
            .put(self.shared_regs(), &mut event.hw, self.is_fake());
    }

    /// Find counters for `events`
    ///
    /// Events before `first_new` are already scheduled and hold their
    /// shared registers. On failure, or when `commit` is false, the claims
    /// taken for the new events are released again.
    pub fn assign_events(
        &self,
        events: &mut [UncoreEvent],
        first_new: usize,
        commit: bool,
    ) -> Result<Vec<usize>> {
        let constraints: Vec<EventConstraint> = events
            .iter_mut()
            .map(|event| self.get_event_constraint(event))
            .collect();

        let assign = keep_current(events, &constraints).or_else(|| schedule(&constraints));

        if assign.is_none() || !commit {
            for event in events.iter_mut().skip(first_new) {
                self.put_event_constraint(event);
            }
        }

        assign.ok_or_else(|| {
            UncpmuError::Conflict(format!(
                "{} events do not fit {} box {}",
                events.len(),
                self.ty().name,
                self.index()
            ))
        })
    }

    /// Turn a raw encoding into an event for this box
    pub fn event_init(&self, pmu_idx: usize, attr: RawConfig) -> Result<UncoreEvent> {
        let ty = self.ty();
        if !self.is_fake() && self.target() == BoxTarget::Msr && self.cpu().is_none() {
            return Err(UncpmuError::InvalidEvent(format!(
                "{} box {} on package {} has no online CPU",
                ty.name,
                self.index(),
                self.package()
            )));
        }

        let mut event = UncoreEvent::new(next_event_id(), attr);
        if attr.config == UNCORE_FIXED_EVENT {
            if !ty.has_fixed() {
                return Err(UncpmuError::InvalidEvent(format!(
                    "{} has no fixed counter",
                    ty.name
                )));
            }
            if ty.single_fixed && pmu_idx > 0 {
                return Err(UncpmuError::InvalidEvent(format!(
                    "{} has a fixed counter on its first box only",
                    ty.name
                )));
            }
            event.hw.config = 0;
        } else {
            event.hw.config = attr.config & ty.raw_event_mask();
            hw_config(ty, self.index(), &mut event.hw, &attr);
        }
        Ok(event)
    }

    /// Check that `group` could be scheduled together on an empty box
    pub fn validate_group(&self, group: &[UncoreEvent]) -> Result<()> {
        let ty = self.ty();
        if group.len() > ty.max_events() {
            return Err(UncpmuError::TooManyEvents(format!(
                "group of {} exceeds the {} counters of {}",
                group.len(),
                ty.max_events(),
                ty.name
            )));
        }
        let fake = UncoreBox::fake(ty, self.index(), self.policy());
        let mut events = group.to_vec();
        fake.assign_events(&mut events, 0, false).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uncpmu_raw::arch::{hswep, knl, snbep};
    use uncpmu_raw::FIXED_COUNTER_INDEX;

    use crate::common::MemoryRegisters;
    use crate::config::RefLimitPolicy;
    use crate::uncore::ExtraDevices;

    fn constraint(idxmsk: u64) -> EventConstraint {
        EventConstraint::new(0, idxmsk, 0, false)
    }

    fn real_box(ty: &'static uncpmu_raw::UncoreType) -> UncoreBox {
        let b = UncoreBox::new(
            ty,
            0,
            0,
            BoxTarget::Msr,
            Arc::new(MemoryRegisters::new()),
            Arc::new(ExtraDevices::new()),
            RefLimitPolicy::Enforce,
        );
        b.set_cpu(Some(0));
        b
    }

    fn attr(config: u64, config1: u64) -> RawConfig {
        RawConfig {
            config,
            config1,
            config2: 0,
        }
    }

    #[test]
    fn test_schedule_most_constrained_first() {
        let assign = schedule(&[constraint(0xf), constraint(0x1), constraint(0x3)]).unwrap();
        assert_eq!(assign, vec![2, 0, 1]);
    }

    #[test]
    fn test_schedule_backtracks_on_overlap() {
        // Lowest-free placement of the first two leaves the third nothing
        let assign = schedule(&[constraint(0x6), constraint(0x5), constraint(0x3)]).unwrap();
        assert_eq!(assign, vec![1, 2, 0]);
    }

    #[test]
    fn test_schedule_impossible() {
        assert!(schedule(&[constraint(0x1), constraint(0x1)]).is_none());
        assert!(schedule(&[EventConstraint::EMPTY]).is_none());
        assert_eq!(schedule(&[]), Some(vec![]));
    }

    #[test]
    fn test_fast_path_keeps_counters() {
        let b = real_box(&snbep::CBOX);
        let mut events: Vec<_> = [3, 1]
            .into_iter()
            .map(|idx| {
                let mut e = b.event_init(0, attr(0x000a, 0)).unwrap();
                e.hw.idx = Some(idx);
                e
            })
            .collect();
        assert_eq!(b.assign_events(&mut events, 2, true).unwrap(), vec![3, 1]);
    }

    #[test]
    fn test_new_event_displaces_running_one() {
        let b = real_box(&snbep::CBOX);
        let mut running = b.event_init(0, attr(0x000a, 0)).unwrap();
        running.hw.idx = Some(0);
        // 0x11 may only use counter 0
        let mut events = vec![running, b.event_init(0, attr(0x0011, 0)).unwrap()];
        assert_eq!(b.assign_events(&mut events, 1, true).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_fixed_event_constraint() {
        let b = real_box(&snbep::UBOX);
        let mut fixed = b.event_init(0, attr(UNCORE_FIXED_EVENT, 0)).unwrap();
        assert_eq!(fixed.hw.config, 0);
        assert_eq!(b.get_event_constraint(&mut fixed), EventConstraint::FIXED);
        let assign = b.assign_events(&mut [fixed], 0, false).unwrap();
        assert_eq!(assign, vec![FIXED_COUNTER_INDEX]);
    }

    #[test]
    fn test_fixed_event_rejected() {
        let b = real_box(&snbep::CBOX);
        assert!(matches!(
            b.event_init(0, attr(UNCORE_FIXED_EVENT, 0)),
            Err(UncpmuError::InvalidEvent(_))
        ));

        let imc = real_box(&knl::IMC_UCLK);
        if knl::IMC_UCLK.single_fixed {
            assert!(imc.event_init(1, attr(UNCORE_FIXED_EVENT, 0)).is_err());
        }
        assert!(imc.event_init(0, attr(UNCORE_FIXED_EVENT, 0)).is_ok());
    }

    #[test]
    fn test_event_init_masks_config() {
        let b = real_box(&snbep::CBOX);
        let e = b.event_init(0, attr(!0xffu64 | 0x11, 0)).unwrap();
        assert_eq!(e.hw.config, (!0xffu64 | 0x11) & snbep::CBOX.raw_event_mask());
    }

    #[test]
    fn test_event_init_needs_collector_cpu() {
        let b = real_box(&snbep::CBOX);
        b.set_cpu(None);
        assert!(matches!(
            b.event_init(0, attr(0x11, 0)),
            Err(UncpmuError::InvalidEvent(_))
        ));
    }

    #[test]
    fn test_failed_assign_releases_only_new_claims() {
        let b = real_box(&snbep::CBOX);
        // TID filter owner
        let mut owner = b.event_init(0, attr(0x0134 | (1 << 19), 0x1)).unwrap();
        assert_ne!(b.get_event_constraint(&mut owner), EventConstraint::EMPTY);
        // Same sub-field, different value
        let rival = b.event_init(0, attr(0x0134 | (1 << 19), 0x2)).unwrap();

        let mut events = vec![owner, rival];
        let err = b.assign_events(&mut events, 1, true).unwrap_err();
        assert!(matches!(err, UncpmuError::Conflict(_)));
        let snap = b.shared_reg_snapshot(0).unwrap();
        assert_eq!(snap.refs[0], 1);
        assert_eq!(snap.config & 0x1f, 0x1);
    }

    #[test]
    fn test_validate_group_leaves_real_box_alone() {
        let b = real_box(&snbep::CBOX);
        let group = vec![
            b.event_init(0, attr(0x0134 | (1 << 19), 0x1)).unwrap(),
            b.event_init(0, attr(0x0011, 0)).unwrap(),
        ];
        b.validate_group(&group).unwrap();
        assert_eq!(b.shared_reg_snapshot(0).unwrap().refs, [0; 5]);
        assert!(group.iter().all(|e| e.hw.extra_reg.alloc == 0));
    }

    #[test]
    fn test_validate_group_filter_conflict() {
        let b = real_box(&snbep::CBOX);
        let group = vec![
            b.event_init(0, attr(0x0134 | (1 << 19), 0x1)).unwrap(),
            b.event_init(0, attr(0x0134 | (1 << 19), 0x2)).unwrap(),
        ];
        assert!(matches!(
            b.validate_group(&group),
            Err(UncpmuError::Conflict(_))
        ));
    }

    #[test]
    fn test_validate_group_too_large() {
        let b = real_box(&hswep::PCU);
        let group: Vec<_> = (0..5)
            .map(|_| b.event_init(0, attr(0x01, 0)).unwrap())
            .collect();
        assert!(matches!(
            b.validate_group(&group),
            Err(UncpmuError::TooManyEvents(_))
        ));
    }
}
