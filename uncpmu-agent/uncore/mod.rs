//! The uncore constraint and allocation engine

pub mod address;
pub mod box_state;
pub mod constraint;
pub mod context;
pub mod devices;
pub mod event;
pub mod ops;
pub mod pci2phy;
pub mod shared_reg;

pub use address::BoxRegisters;
pub use box_state::{BoxTarget, EventStatus, UncoreBox, UNCORE_PMC_IDX_MAX};
pub use constraint::schedule;
pub use context::{pmu_name, resolve_event, ProbeOutcome, UncoreContext, UncorePmu};
pub use devices::ExtraDevices;
pub use event::{EventId, ExtraRegState, HwEvent, UncoreEvent};
pub use pci2phy::Pci2PhyMap;
pub use shared_reg::{ClaimOutcome, SharedReg, SharedRegAllocator, SharedRegSnapshot};
