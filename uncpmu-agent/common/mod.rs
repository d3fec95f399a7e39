pub mod access;
pub mod affinity;
pub mod arch;
pub mod cpuid;
pub mod msr;
pub mod pci;
pub mod topology;

pub use access::{HardwareAccess, MemoryRegisters, NullRegisters, RegisterAccess, RegisterKey};
pub use affinity::AffinityGuard;
pub use arch::CPU_GENERATION;
pub use msr::{Msr, MsrHandle};
pub use pci::{PciAddress, PciDeviceInfo};
pub use topology::{FixedTopology, SysfsTopology, Topology};
