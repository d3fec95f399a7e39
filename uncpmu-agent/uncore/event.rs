//! Logical events as seen by the engine

use uncpmu_raw::format::RawConfig;
use uncpmu_raw::FIXED_COUNTER_INDEX;

/// Per-event view of one shared register
///
/// `idx` is interpreted by the allocator that owns the register: a bitmask of
/// sub-fields for cbox filters, a byte lane for the PCU band filter and a
/// register index for whole-register filters. `alloc` records the claims the
/// event currently holds so release is exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtraRegState {
    pub idx: Option<u32>,
    pub reg: u32,
    pub config: u64,
    pub alloc: u32,
}

impl ExtraRegState {
    pub fn is_none(&self) -> bool {
        self.idx.is_none()
    }
}

/// Hardware-side state of an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwEvent {
    /// Control value without the enable bit
    pub config: u64,
    pub config_base: u32,
    pub event_base: u32,
    /// Counter slot, `FIXED_COUNTER_INDEX` for the fixed counter
    pub idx: Option<usize>,
    pub last_tag: u64,
    pub prev_count: u64,
    /// `prev_count` could not be sampled; the next read only rebases
    pub prev_stale: bool,
    pub stopped: bool,
    pub uptodate: bool,
    /// Stay stopped when rescheduled
    pub arch_stopped: bool,
    pub extra_reg: ExtraRegState,
    pub branch_reg: ExtraRegState,
}

impl Default for HwEvent {
    fn default() -> Self {
        Self {
            config: 0,
            config_base: 0,
            event_base: 0,
            idx: None,
            last_tag: !0,
            prev_count: 0,
            prev_stale: false,
            stopped: true,
            uptodate: true,
            arch_stopped: false,
            extra_reg: ExtraRegState::default(),
            branch_reg: ExtraRegState::default(),
        }
    }
}

impl HwEvent {
    pub fn is_fixed(&self) -> bool {
        self.idx == Some(FIXED_COUNTER_INDEX)
    }
}

/// Handle of an event added to a box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u64);

/// One requested measurement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncoreEvent {
    pub id: EventId,
    pub attr: RawConfig,
    pub hw: HwEvent,
    count: u64,
}

impl UncoreEvent {
    pub fn new(id: EventId, attr: RawConfig) -> Self {
        Self {
            id,
            attr,
            hw: HwEvent::default(),
            count: 0,
        }
    }

    /// Accumulated 64-bit value
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Fold a new raw counter value into the total
    ///
    /// The delta is taken modulo `2^width` by shifting both samples to the
    /// top of the word, so a single wrap between samples is absorbed.
    pub fn accumulate(&mut self, new_raw: u64, width: u32) -> u64 {
        if std::mem::take(&mut self.hw.prev_stale) {
            self.hw.prev_count = new_raw;
            return 0;
        }
        let shift = 64 - width.clamp(1, 64);
        let prev = std::mem::replace(&mut self.hw.prev_count, new_raw);
        let delta = (new_raw << shift).wrapping_sub(prev << shift) >> shift;
        self.count = self.count.wrapping_add(delta);
        delta
    }
}
