//! One instance of a unit type on one package
//!
//! A box owns its counter slots, the events scheduled on them and the
//! shared filter registers those events claim. Scheduling changes happen
//! under the slot lock; shared registers have locks of their own and are
//! always taken after it.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uncpmu_raw::{Access, UncoreType, FIXED_COUNTER_INDEX};

use crate::common::{NullRegisters, PciAddress, RegisterAccess};
use crate::config::RefLimitPolicy;
use crate::error::{Result, UncpmuError};
use crate::uncore::address::BoxRegisters;
use crate::uncore::devices::ExtraDevices;
use crate::uncore::event::{EventId, UncoreEvent};
use crate::uncore::shared_reg::{SharedReg, SharedRegAllocator, SharedRegSnapshot};

/// Generic slots plus the fixed one
pub const UNCORE_PMC_IDX_MAX: usize = FIXED_COUNTER_INDEX + 1;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_event_id() -> EventId {
    EventId(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed))
}

/// How a box's registers are reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxTarget {
    /// MSRs, read and written on the box's collector CPU
    Msr,
    Pci(PciAddress),
}

#[derive(Debug)]
struct BoxSlots {
    events: Vec<UncoreEvent>,
    n_active: usize,
    active_mask: u64,
    tags: [u64; UNCORE_PMC_IDX_MAX],
}

impl BoxSlots {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            n_active: 0,
            active_mask: 0,
            tags: [0; UNCORE_PMC_IDX_MAX],
        }
    }

    fn position(&self, id: EventId) -> Option<usize> {
        self.events.iter().position(|e| e.id == id)
    }
}

/// Point-in-time view of a scheduled event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStatus {
    pub id: EventId,
    pub idx: Option<usize>,
    pub active: bool,
    pub count: u64,
}

pub struct UncoreBox {
    ty: &'static UncoreType,
    index: usize,
    package: u32,
    target: BoxTarget,
    fake: bool,
    cpu: Mutex<Option<u32>>,
    initiated: AtomicBool,
    ctl_offs8: AtomicBool,
    refcnt: AtomicUsize,
    shared_regs: Vec<SharedReg>,
    allocator: SharedRegAllocator,
    policy: RefLimitPolicy,
    access: Arc<dyn RegisterAccess>,
    extras: Arc<ExtraDevices>,
    slots: Mutex<BoxSlots>,
}

impl std::fmt::Debug for UncoreBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UncoreBox")
            .field("type", &self.ty.name)
            .field("index", &self.index)
            .field("package", &self.package)
            .field("target", &self.target)
            .field("fake", &self.fake)
            .field("cpu", &*self.cpu.lock())
            .finish()
    }
}

impl UncoreBox {
    pub fn new(
        ty: &'static UncoreType,
        index: usize,
        package: u32,
        target: BoxTarget,
        access: Arc<dyn RegisterAccess>,
        extras: Arc<ExtraDevices>,
        policy: RefLimitPolicy,
    ) -> Self {
        Self {
            ty,
            index,
            package,
            target,
            fake: false,
            cpu: Mutex::new(None),
            initiated: AtomicBool::new(false),
            ctl_offs8: AtomicBool::new(false),
            refcnt: AtomicUsize::new(0),
            shared_regs: (0..ty.num_shared_regs).map(|_| SharedReg::new()).collect(),
            allocator: SharedRegAllocator::for_ops(&ty.ops),
            policy,
            access,
            extras,
            slots: Mutex::new(BoxSlots::new()),
        }
    }

    /// Scratch box for trial scheduling; it has private shared registers
    /// and no hardware behind it
    pub fn fake(ty: &'static UncoreType, index: usize, policy: RefLimitPolicy) -> Self {
        let target = match ty.access {
            Access::Msr => BoxTarget::Msr,
            Access::Pci => BoxTarget::Pci(PciAddress::new(0, 0, 0, 0)),
        };
        let mut fake = Self::new(
            ty,
            index,
            0,
            target,
            Arc::new(NullRegisters),
            Arc::new(ExtraDevices::new()),
            policy,
        );
        fake.fake = true;
        fake
    }

    pub fn ty(&self) -> &'static UncoreType {
        self.ty
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn package(&self) -> u32 {
        self.package
    }

    pub fn target(&self) -> BoxTarget {
        self.target
    }

    pub fn is_fake(&self) -> bool {
        self.fake
    }

    pub fn policy(&self) -> RefLimitPolicy {
        self.policy
    }

    pub(crate) fn access(&self) -> &dyn RegisterAccess {
        self.access.as_ref()
    }

    pub(crate) fn extras(&self) -> &ExtraDevices {
        &self.extras
    }

    pub(crate) fn allocator(&self) -> SharedRegAllocator {
        self.allocator
    }

    pub(crate) fn shared_regs(&self) -> &[SharedReg] {
        &self.shared_regs
    }

    pub(crate) fn shared_reg_config(&self, idx: usize) -> u64 {
        self.shared_regs.get(idx).map_or(0, SharedReg::config)
    }

    pub fn shared_reg_snapshot(&self, idx: usize) -> Option<SharedRegSnapshot> {
        self.shared_regs.get(idx).map(SharedReg::snapshot)
    }

    /// CPU that collects this box, if any
    pub fn cpu(&self) -> Option<u32> {
        *self.cpu.lock()
    }

    pub fn set_cpu(&self, cpu: Option<u32>) {
        *self.cpu.lock() = cpu;
    }

    pub(crate) fn set_ctl_offs8(&self) {
        self.ctl_offs8.store(true, Ordering::Release);
    }

    pub fn registers(&self) -> BoxRegisters {
        BoxRegisters {
            ctl_offs8: self.ctl_offs8.load(Ordering::Acquire),
            ..BoxRegisters::new(self.ty, self.index)
        }
    }

    /// Take a reference; returns the new count
    pub(crate) fn get_ref(&self) -> usize {
        self.refcnt.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop a reference; returns the new count
    pub(crate) fn put_ref(&self) -> usize {
        let prev = self
            .refcnt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    pub fn refcnt(&self) -> usize {
        self.refcnt.load(Ordering::Acquire)
    }

    pub fn is_initiated(&self) -> bool {
        self.initiated.load(Ordering::Acquire)
    }

    /// Bring the box to its init state once; later calls do nothing
    pub fn init_box(&self) -> bool {
        if self.initiated.swap(true, Ordering::AcqRel) {
            return false;
        }
        crate::hw_warn!(self.hw_init_box(), "init {} box {}", self.ty.name, self.index);
        true
    }

    pub fn exit_box(&self) -> bool {
        if !self.initiated.swap(false, Ordering::AcqRel) {
            return false;
        }
        crate::hw_warn!(self.hw_exit_box(), "exit {} box {}", self.ty.name, self.index);
        true
    }

    /// Counter width of the slot an event occupies
    fn counter_bits(&self, event: &UncoreEvent) -> u32 {
        self.registers().counter_bits(event.hw.is_fixed())
    }

    fn update_event(&self, event: &mut UncoreEvent) -> Result<u64> {
        let raw = self.hw_read_counter(&event.hw)?;
        let bits = self.counter_bits(event);
        Ok(event.accumulate(raw, bits))
    }

    fn assign_hw(&self, slots: &mut BoxSlots, i: usize, idx: usize) {
        slots.tags[idx] = slots.tags[idx].wrapping_add(1);
        let tag = slots.tags[idx];
        let regs = self.registers();
        let hw = &mut slots.events[i].hw;
        hw.idx = Some(idx);
        hw.last_tag = tag;
        if idx == FIXED_COUNTER_INDEX {
            hw.config_base = regs.fixed_ctl();
            hw.event_base = regs.fixed_ctr();
        } else {
            hw.config_base = regs.event_ctl(idx);
            hw.event_base = regs.perf_ctr(idx);
        }
    }

    fn start_locked(&self, slots: &mut BoxSlots, i: usize) {
        let event = &mut slots.events[i];
        let Some(idx) = event.hw.idx else {
            return;
        };
        if !event.hw.stopped {
            return;
        }
        event.hw.stopped = false;
        event.hw.uptodate = false;

        match self.hw_read_counter(&event.hw) {
            Ok(raw) => {
                event.hw.prev_count = raw;
                event.hw.prev_stale = false;
            }
            Err(e) => {
                tracing::warn!("Failed to read {} counter {}: {}", self.ty.name, idx, e);
                event.hw.prev_stale = true;
            }
        }
        crate::hw_warn!(self.hw_enable_event(event), "enable {} counter {}", self.ty.name, idx);

        slots.active_mask |= 1 << idx;
        slots.n_active += 1;
        if slots.n_active == 1 {
            crate::hw_warn!(self.hw_enable_box(), "enable {} box {}", self.ty.name, self.index);
        }
    }

    fn stop_locked(&self, slots: &mut BoxSlots, i: usize, update: bool) {
        let event = &mut slots.events[i];
        if let Some(idx) = event.hw.idx {
            if slots.active_mask & (1 << idx) != 0 {
                slots.active_mask &= !(1 << idx);
                crate::hw_warn!(self.hw_disable_event(&event.hw), "disable {} counter {}", self.ty.name, idx);
                slots.n_active -= 1;
                event.hw.stopped = true;
                if slots.n_active == 0 {
                    crate::hw_warn!(self.hw_disable_box(), "disable {} box {}", self.ty.name, self.index);
                }
            }
        }

        if update && !event.hw.uptodate {
            event.hw.uptodate =
                crate::hw_warn!(self.update_event(event), "read {} event {:?}", self.ty.name, event.id);
        }
    }

    /// Schedule `event` on this box, moving already running events if the
    /// new schedule needs their counters
    pub fn add_event(&self, mut event: UncoreEvent, start: bool) -> Result<EventId> {
        let mut slots = self.slots.lock();
        let max = self.ty.max_events();
        if slots.events.len() >= max {
            return Err(UncpmuError::TooManyEvents(format!(
                "{} box {} already holds {} events",
                self.ty.name, self.index, max
            )));
        }

        let id = event.id;
        let n_old = slots.events.len();
        event.hw.stopped = true;
        event.hw.uptodate = true;
        event.hw.arch_stopped = !start;
        slots.events.push(event);

        let assign = match self.assign_events(&mut slots.events, n_old, true) {
            Ok(assign) => assign,
            Err(e) => {
                slots.events.pop();
                return Err(e);
            }
        };

        // Stop events whose counter moves
        for i in 0..n_old {
            let hw = &slots.events[i].hw;
            if hw.idx == Some(assign[i]) && hw.last_tag == slots.tags[assign[i]] {
                continue;
            }
            if hw.stopped {
                slots.events[i].hw.arch_stopped = true;
            }
            self.stop_locked(&mut slots, i, true);
        }

        for (i, &idx) in assign.iter().enumerate() {
            let hw = &slots.events[i].hw;
            let moved = hw.idx != Some(idx) || hw.last_tag != slots.tags[idx];
            if moved {
                self.assign_hw(&mut slots, i, idx);
            } else if i < n_old {
                continue;
            }
            if slots.events[i].hw.arch_stopped {
                continue;
            }
            self.start_locked(&mut slots, i);
        }

        tracing::debug!(
            "Added event {:?} to {} box {} on package {}",
            id,
            self.ty.name,
            self.index,
            self.package
        );
        Ok(id)
    }

    /// Remove an event, folding in its final count
    pub fn del_event(&self, id: EventId) -> Option<UncoreEvent> {
        let mut slots = self.slots.lock();
        let i = slots.position(id)?;
        self.stop_locked(&mut slots, i, true);

        let mut event = slots.events.remove(i);
        self.put_event_constraint(&mut event);
        event.hw.idx = None;
        event.hw.last_tag = !0;
        Some(event)
    }

    pub fn start_event(&self, id: EventId) -> bool {
        let mut slots = self.slots.lock();
        let Some(i) = slots.position(id) else {
            return false;
        };
        slots.events[i].hw.arch_stopped = false;
        self.start_locked(&mut slots, i);
        true
    }

    pub fn stop_event(&self, id: EventId, update: bool) -> bool {
        let mut slots = self.slots.lock();
        let Some(i) = slots.position(id) else {
            return false;
        };
        slots.events[i].hw.arch_stopped = true;
        self.stop_locked(&mut slots, i, update);
        true
    }

    /// Current total of an event, sampling the counter if it is running
    pub fn read_event(&self, id: EventId) -> Option<u64> {
        let mut slots = self.slots.lock();
        let i = slots.position(id)?;
        let active = slots.events[i]
            .hw
            .idx
            .is_some_and(|idx| slots.active_mask & (1 << idx) != 0);
        let event = &mut slots.events[i];
        if active {
            crate::hw_warn!(self.update_event(event), "read {} event {:?}", self.ty.name, id);
        }
        Some(event.count())
    }

    /// Sample every running counter; returns how many were read
    pub fn update_all(&self) -> usize {
        let mut slots = self.slots.lock();
        let active_mask = slots.active_mask;
        let mut updated = 0;
        for event in slots.events.iter_mut() {
            let Some(idx) = event.hw.idx else {
                continue;
            };
            if active_mask & (1 << idx) == 0 {
                continue;
            }
            if crate::hw_warn!(self.update_event(event), "read {} event {:?}", self.ty.name, event.id) {
                updated += 1;
            }
        }
        updated
    }

    pub fn event_ids(&self) -> Vec<EventId> {
        self.slots.lock().events.iter().map(|e| e.id).collect()
    }

    pub fn event_status(&self, id: EventId) -> Option<EventStatus> {
        let slots = self.slots.lock();
        let event = slots.events.iter().find(|e| e.id == id)?;
        Some(EventStatus {
            id,
            idx: event.hw.idx,
            active: event
                .hw
                .idx
                .is_some_and(|idx| slots.active_mask & (1 << idx) != 0),
            count: event.count(),
        })
    }

    pub fn n_events(&self) -> usize {
        self.slots.lock().events.len()
    }

    pub fn n_active(&self) -> usize {
        self.slots.lock().n_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{MemoryRegisters, RegisterKey};
    use uncpmu_raw::arch::{hswep, ivbep, knl, skx, snbep};
    use uncpmu_raw::format::RawConfig;
    use uncpmu_raw::register::bits::{BOX_CTL_FRZ, CTL_EN, CTL_TID_EN};
    use uncpmu_raw::ExtraDevice;

    fn msr_box(ty: &'static UncoreType, index: usize, regs: &Arc<MemoryRegisters>) -> UncoreBox {
        let b = UncoreBox::new(
            ty,
            index,
            0,
            BoxTarget::Msr,
            regs.clone(),
            Arc::new(ExtraDevices::new()),
            RefLimitPolicy::Enforce,
        );
        b.set_cpu(Some(0));
        b
    }

    fn event(ty: &UncoreType, index: usize, config: u64) -> UncoreEvent {
        let attr = RawConfig {
            config,
            config1: 0,
            config2: 0,
        };
        event_with(ty, index, attr)
    }

    fn event_with(ty: &UncoreType, index: usize, attr: RawConfig) -> UncoreEvent {
        let config = attr.config;
        let mut e = UncoreEvent::new(next_event_id(), attr);
        e.hw.config = config & ty.raw_event_mask();
        crate::uncore::ops::hw_config(ty, index, &mut e.hw, &attr);
        e
    }

    fn msr(addr: u32) -> RegisterKey {
        RegisterKey::Msr { cpu: 0, msr: addr }
    }

    #[test]
    fn test_init_exit_idempotent() {
        let regs = Arc::new(MemoryRegisters::new());
        let b = msr_box(&snbep::CBOX, 1, &regs);
        let box_ctl = b.registers().box_ctl();

        assert!(b.init_box());
        assert!(!b.init_box());
        assert_eq!(regs.writes_to(msr(box_ctl)), vec![0x10003]);

        assert!(b.exit_box());
        assert!(!b.exit_box());
        assert_eq!(regs.writes_to(msr(box_ctl)).len(), 2);
        assert_ne!(regs.get(msr(box_ctl)) & BOX_CTL_FRZ, 0);
    }

    #[test]
    fn test_bit_by_bit_init() {
        let regs = Arc::new(MemoryRegisters::new());
        let b = msr_box(&hswep::SBOX, 0, &regs);
        b.init_box();
        assert_eq!(
            regs.writes_to(msr(b.registers().box_ctl())),
            vec![0x1, 0x3, 0x10003]
        );
    }

    #[test]
    fn test_init_skipped_without_box_control() {
        let regs = Arc::new(MemoryRegisters::new());
        let b = msr_box(&snbep::UBOX, 0, &regs);
        b.init_box();
        assert!(regs.writes().is_empty());
    }

    #[test]
    fn test_ctl_offs8_after_init() {
        let regs = Arc::new(MemoryRegisters::new());
        let dev = PciAddress::new(0, 0x85, 14, 0);
        let b = UncoreBox::new(
            &skx::UPI,
            0,
            0,
            BoxTarget::Pci(dev),
            regs.clone(),
            Arc::new(ExtraDevices::new()),
            RefLimitPolicy::Enforce,
        );
        assert_eq!(b.registers().event_ctl(1), skx::pci::UPI_PMON_CTL0 + 4);
        b.init_box();
        assert_eq!(b.registers().event_ctl(1), skx::pci::UPI_PMON_CTL0 + 8);
        assert_eq!(
            regs.writes_to(RegisterKey::Pci {
                device: dev,
                offset: skx::pci::UPI_PMON_BOX_CTL
            }),
            vec![0x3]
        );
    }

    #[test]
    fn test_add_start_read_del() {
        let regs = Arc::new(MemoryRegisters::new());
        let b = msr_box(&ivbep::CBOX, 0, &regs);
        b.init_box();

        let e = event(&ivbep::CBOX, 0, 0x0011);
        let id = b.add_event(e, true).unwrap();
        let status = b.event_status(id).unwrap();
        assert!(status.active);
        let idx = status.idx.unwrap();
        let ctl = b.registers().event_ctl(idx);
        let ctr = b.registers().perf_ctr(idx);
        assert_eq!(regs.get(msr(ctl)), 0x0011 | CTL_EN);
        assert_eq!(regs.get(msr(b.registers().box_ctl())) & BOX_CTL_FRZ, 0);

        regs.set(msr(ctr), 500);
        assert_eq!(b.read_event(id), Some(500));
        regs.set(msr(ctr), 800);
        assert_eq!(b.update_all(), 1);

        let removed = b.del_event(id).unwrap();
        assert_eq!(removed.count(), 800);
        assert_eq!(removed.hw.idx, None);
        assert_eq!(b.n_active(), 0);
        assert_ne!(regs.get(msr(b.registers().box_ctl())) & BOX_CTL_FRZ, 0);
    }

    #[test]
    fn test_too_many_events() {
        let regs = Arc::new(MemoryRegisters::new());
        let b = msr_box(&snbep::PCU, 0, &regs);
        for _ in 0..snbep::PCU.max_events() {
            b.add_event(event(&snbep::PCU, 0, 0x01), true).unwrap();
        }
        let err = b.add_event(event(&snbep::PCU, 0, 0x01), true).unwrap_err();
        assert!(matches!(err, UncpmuError::TooManyEvents(_)));
    }

    #[test]
    fn test_add_without_start_stays_stopped() {
        let regs = Arc::new(MemoryRegisters::new());
        let b = msr_box(&snbep::CBOX, 0, &regs);
        let id = b.add_event(event(&snbep::CBOX, 0, 0x0011), false).unwrap();
        let status = b.event_status(id).unwrap();
        assert!(status.idx.is_some());
        assert!(!status.active);

        assert!(b.start_event(id));
        assert!(b.event_status(id).unwrap().active);
        assert!(b.stop_event(id, true));
        assert!(!b.event_status(id).unwrap().active);
    }

    #[test]
    fn test_fixed_counter_width() {
        let regs = Arc::new(MemoryRegisters::new());
        let dev = PciAddress::new(0, 0x7f, 8, 2);
        let b = UncoreBox::new(
            &knl::IMC_UCLK,
            0,
            0,
            BoxTarget::Pci(dev),
            regs.clone(),
            Arc::new(ExtraDevices::new()),
            RefLimitPolicy::Enforce,
        );
        let mut fixed = UncoreEvent::new(
            next_event_id(),
            RawConfig {
                config: 0xff,
                config1: 0,
                config2: 0,
            },
        );
        fixed.hw.config = 0;
        let id = b.add_event(fixed, true).unwrap();
        let status = b.event_status(id).unwrap();
        assert_eq!(status.idx, Some(FIXED_COUNTER_INDEX));
        assert_eq!(
            regs.get(RegisterKey::Pci {
                device: dev,
                offset: knl::IMC_UCLK.fixed_ctl
            }),
            uncpmu_raw::register::bits::KNL_FIXED_CTL_EN
        );
    }

    #[test]
    fn test_split_cbox_filter_writes() {
        // tid + nid on IVB-EP: the high half sits six registers up
        let regs = Arc::new(MemoryRegisters::new());
        let b = msr_box(&ivbep::CBOX, 1, &regs);
        let attr = RawConfig {
            config: 0x4435 | CTL_TID_EN,
            config1: (0x2 << 32) | 0x5,
            config2: 0,
        };
        b.add_event(event_with(&ivbep::CBOX, 1, attr), true).unwrap();
        let reg = ivbep::CBOX_FILTER.register(1);
        assert_eq!(regs.writes_to(msr(reg)), vec![0x5]);
        assert_eq!(regs.writes_to(msr(reg + ivbep::CBO_FILTER_HIGH_OFFSET)), vec![0x2]);

        // HSW-EP keeps both halves adjacent
        let regs = Arc::new(MemoryRegisters::new());
        let b = msr_box(&hswep::CBOX, 3, &regs);
        let attr = RawConfig {
            config: 0x0011 | CTL_TID_EN,
            config1: 0x21,
            config2: 0,
        };
        b.add_event(event_with(&hswep::CBOX, 3, attr), true).unwrap();
        let reg = hswep::CBOX_FILTER.register(3);
        assert_eq!(regs.writes_to(msr(reg)), vec![0x21]);
        assert_eq!(regs.writes_to(msr(reg + 1)), vec![0]);
    }

    #[test]
    fn test_qpi_packet_filter_writes() {
        let regs = Arc::new(MemoryRegisters::new());
        let extras = Arc::new(ExtraDevices::new());
        let qpi_dev = PciAddress::new(0, 0x3f, 8, 2);
        let filter_dev = PciAddress::new(0, 0x3f, 8, 6);
        extras.insert(0, ExtraDevice::QpiPort0Filter, filter_dev);
        let b = UncoreBox::new(
            &snbep::QPI,
            0,
            0,
            BoxTarget::Pci(qpi_dev),
            regs.clone(),
            extras,
            RefLimitPolicy::Enforce,
        );
        let attr = RawConfig {
            config: 0x38,
            config1: 0x1234_5678_9abc_def0,
            config2: 0xff_0000_00ff,
        };
        let id = b.add_event(event_with(&snbep::QPI, 0, attr), true).unwrap();

        let filter = |offset| RegisterKey::Pci {
            device: filter_dev,
            offset,
        };
        let match0 = snbep::pci::Q_PY_PKT_MATCH0;
        let mask0 = snbep::pci::Q_PY_PKT_MASK0;
        assert_eq!(regs.writes_to(filter(match0)), vec![0x9abc_def0]);
        assert_eq!(regs.writes_to(filter(match0 + 4)), vec![0x1234_5678]);
        assert_eq!(regs.writes_to(filter(mask0)), vec![0xff]);
        assert_eq!(regs.writes_to(filter(mask0 + 4)), vec![0xff]);

        let idx = b.event_status(id).unwrap().idx.unwrap();
        let ctl = RegisterKey::Pci {
            device: qpi_dev,
            offset: b.registers().event_ctl(idx),
        };
        assert_eq!(regs.get(ctl), 0x38 | CTL_EN);
    }

    #[test]
    fn test_pcu_relocated_band_programming() {
        let regs = Arc::new(MemoryRegisters::new());
        let b = msr_box(&snbep::PCU, 0, &regs);
        let band = |config1| RawConfig {
            config: 0xb,
            config1,
            config2: 0,
        };
        let first = b.add_event(event_with(&snbep::PCU, 0, band(0x10)), true).unwrap();
        let second = b.add_event(event_with(&snbep::PCU, 0, band(0x20)), true).unwrap();

        let filter = msr(snbep::msr::PCU_PMON_BOX_FILTER);
        assert_eq!(regs.writes_to(filter).first(), Some(&0x10));
        assert_eq!(regs.get(filter), 0x2010);

        let ctl_of = |id| msr(b.registers().event_ctl(b.event_status(id).unwrap().idx.unwrap()));
        assert_eq!(regs.get(ctl_of(first)), 0xb | CTL_EN);
        assert_eq!(regs.get(ctl_of(second)), 0xc | CTL_EN);
    }

    /// Memory registers whose reads can be made to fail
    struct FlakyRegisters {
        inner: MemoryRegisters,
        fail_reads: AtomicBool,
    }

    impl RegisterAccess for FlakyRegisters {
        fn read_msr(&self, cpu: u32, msr: u32) -> Result<u64> {
            if self.fail_reads.load(Ordering::Relaxed) {
                return Err(UncpmuError::MsrError(format!("{msr:#x} unreadable")));
            }
            self.inner.read_msr(cpu, msr)
        }

        fn write_msr(&self, cpu: u32, msr: u32, value: u64) -> Result<()> {
            self.inner.write_msr(cpu, msr, value)
        }

        fn read32(&self, device: PciAddress, offset: u32) -> Result<u32> {
            self.inner.read32(device, offset)
        }

        fn write32(&self, device: PciAddress, offset: u32, value: u32) -> Result<()> {
            self.inner.write32(device, offset, value)
        }
    }

    #[test]
    fn test_failed_counter_reads_do_not_corrupt_totals() {
        let regs = Arc::new(FlakyRegisters {
            inner: MemoryRegisters::new(),
            fail_reads: AtomicBool::new(true),
        });
        let b = UncoreBox::new(
            &snbep::UBOX,
            0,
            0,
            BoxTarget::Msr,
            regs.clone(),
            Arc::new(ExtraDevices::new()),
            RefLimitPolicy::Enforce,
        );
        b.set_cpu(Some(0));
        let id = b.add_event(event(&snbep::UBOX, 0, 0x11), true).unwrap();
        let idx = b.event_status(id).unwrap().idx.unwrap();
        let ctr = msr(b.registers().perf_ctr(idx));

        // The start sample failed, so the first good read only sets the baseline
        regs.inner.set(ctr, 1000);
        regs.fail_reads.store(false, Ordering::Relaxed);
        assert_eq!(b.read_event(id), Some(0));
        regs.inner.set(ctr, 1200);
        assert_eq!(b.read_event(id), Some(200));

        // A failed final read leaves the event due for another update
        regs.inner.set(ctr, 1500);
        regs.fail_reads.store(true, Ordering::Relaxed);
        assert!(b.stop_event(id, true));
        assert_eq!(b.read_event(id), Some(200));
        regs.fail_reads.store(false, Ordering::Relaxed);
        assert!(b.stop_event(id, true));
        assert_eq!(b.read_event(id), Some(500));
    }

    #[test]
    fn test_refcounts() {
        let regs = Arc::new(MemoryRegisters::new());
        let b = msr_box(&snbep::UBOX, 0, &regs);
        assert_eq!(b.get_ref(), 1);
        assert_eq!(b.get_ref(), 2);
        assert_eq!(b.put_ref(), 1);
        assert_eq!(b.put_ref(), 0);
        assert_eq!(b.put_ref(), 0);
    }
}
