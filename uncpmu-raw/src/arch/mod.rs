//! Per-generation uncore tables
//!
//! Each module describes the MSR and PCI resident unit types of one Xeon
//! generation. Later generations reuse pieces of earlier ones, so the
//! modules reference each other freely.

pub mod bdx;
pub mod hswep;
pub mod ivbep;
pub mod knl;
pub mod skx;
pub mod snbep;

use crate::constraint::ExtraReg;
use crate::register::bits::CTL_TID_EN;

/// Thread-id filtering applies whenever the tid enable bit is set
pub(crate) const TID_EN_EXTRA_REG: ExtraReg = ExtraReg::new(CTL_TID_EN, CTL_TID_EN, 0x1);
