//! # uncpmu-raw
//!
//! Per-generation policy tables for the Intel Xeon uncore performance
//! monitoring units, from Sandy Bridge-EP through Skylake-X and Knights
//! Landing.
//!
//! Everything in this crate is plain data: register bases and strides,
//! raw event masks, shared filter layouts, event-to-filter mappings,
//! counter constraints and format attributes. The allocation and
//! programming engine that consumes these tables lives in `uncpmu-agent`.
//!
//! ## Usage
//!
//! ```ignore
//! use uncpmu_raw::{Generation, RegisterLayout};
//! use uncpmu_raw::register::BoxControl;
//!
//! let generation = Generation::from_cpu_model(0x3f).unwrap();
//! for ty in generation.msr_uncores() {
//!     println!("{} x{} ({} counters)", ty.name, ty.num_boxes, ty.num_counters);
//! }
//!
//! let init = BoxControl::snbep_init().to_msr_value();
//! ```

pub mod arch;
pub mod constraint;
pub mod format;
pub mod generation;
pub mod register;
pub mod types;

pub use constraint::{EventConstraint, ExtraReg};
pub use format::{EventDesc, FormatAttr, FormatError};
pub use generation::{ExtraDevice, Generation, Pci2PhyParams, PciUnit, PciUnitKind};
pub use register::{Register, RegisterLayout};
pub use types::{
    Access, BoxInit, BoxOffset, CboxFilter, FilterWrite, OpsKind, UncoreType,
    FIXED_COUNTER_INDEX, MAX_GENERIC_COUNTERS, UNCORE_FIXED_EVENT,
};
