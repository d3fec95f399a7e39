//! PCI bus to physical package mapping
//!
//! Each PCI segment gets a 256-entry table indexed by bus number. Buses are
//! filled from the node id registers of every ubox device; buses without a
//! ubox inherit the nearest known entry in the walk direction.

use std::collections::BTreeMap;

use uncpmu_raw::Pci2PhyParams;

use crate::common::pci::INTEL_VENDOR_ID;
use crate::common::{PciDeviceInfo, RegisterAccess};
use crate::error::{Result, UncpmuError};

const BUSES: usize = 256;
const NODE_ID_FIELDS: u32 = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pci2PhyMap {
    segments: BTreeMap<u32, [Option<u32>; BUSES]>,
}

impl Pci2PhyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, segment: u32, bus: u8, package: u32) {
        self.segments.entry(segment).or_insert([None; BUSES])[bus as usize] = Some(package);
    }

    pub fn package_of(&self, segment: u32, bus: u8) -> Option<u32> {
        self.segments.get(&segment)?[bus as usize]
    }

    pub fn segments(&self) -> impl Iterator<Item = u32> + '_ {
        self.segments.keys().copied()
    }

    /// Carry known entries over unmapped buses
    pub fn fill(&mut self, reverse: bool) {
        for map in self.segments.values_mut() {
            let mut last = None;
            let mut visit = |entry: &mut Option<u32>| match *entry {
                Some(package) => last = Some(package),
                None => *entry = last,
            };
            if reverse {
                map.iter_mut().rev().for_each(&mut visit);
            } else {
                map.iter_mut().for_each(&mut visit);
            }
        }
    }

    pub fn build(
        params: Pci2PhyParams,
        devices: &[PciDeviceInfo],
        access: &dyn RegisterAccess,
    ) -> Result<Self> {
        let mut map = Self::new();
        match params {
            Pci2PhyParams::NodeIdScan {
                ubox_device,
                nodeid_reg,
                idmap_reg,
                reverse,
            } => {
                let uboxes = devices
                    .iter()
                    .filter(|d| d.vendor_id == INTEL_VENDOR_ID && d.device_id == ubox_device);
                for ubox in uboxes {
                    let addr = ubox.address;
                    let nodeid = access.read32(addr, nodeid_reg)?;
                    let idmap = access.read32(addr, idmap_reg)?;

                    let package = (0..NODE_ID_FIELDS).find(|i| nodeid == (idmap >> (3 * i)) & 0x7);
                    match package {
                        Some(package) => {
                            tracing::debug!("Bus {:02x} of segment {:04x} is package {}", addr.bus, addr.segment, package);
                            map.set(addr.segment, addr.bus, package);
                        }
                        None => tracing::warn!(
                            "Node id {:#x} of ubox {} not found in map {:#x}",
                            nodeid,
                            addr,
                            idmap
                        ),
                    }
                }
                map.fill(reverse);
            }
            Pci2PhyParams::SingleSocket { devices: ids } => {
                for &id in ids {
                    let found = devices
                        .iter()
                        .find(|d| d.vendor_id == INTEL_VENDOR_ID && d.device_id == id)
                        .ok_or_else(|| {
                            UncpmuError::PciError(format!("device {:04x} not present", id))
                        })?;
                    map.set(found.address.segment, found.address.bus, 0);
                }
            }
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{MemoryRegisters, NullRegisters, PciAddress, RegisterKey};
    use uncpmu_raw::arch::snbep;
    use uncpmu_raw::Generation;

    fn ubox(segment: u32, bus: u8) -> PciDeviceInfo {
        PciDeviceInfo {
            address: PciAddress::new(segment, bus, 13, 5),
            vendor_id: INTEL_VENDOR_ID,
            device_id: snbep::UBOX_DEVICE_ID,
        }
    }

    fn program(regs: &MemoryRegisters, dev: &PciDeviceInfo, nodeid: u64, idmap: u64) {
        let device = dev.address;
        regs.set(
            RegisterKey::Pci {
                device,
                offset: snbep::pci::CPUNODEID,
            },
            nodeid,
        );
        regs.set(
            RegisterKey::Pci {
                device,
                offset: snbep::pci::GIDNIDMAP,
            },
            idmap,
        );
    }

    #[test]
    fn test_two_socket_reverse_fill() {
        let regs = MemoryRegisters::new();
        let socket0 = ubox(0, 0x3f);
        let socket1 = ubox(0, 0x7f);
        // Node ids 0 and 1 in fields 0 and 1
        let idmap = 0x1 << 3;
        program(&regs, &socket0, 0, idmap);
        program(&regs, &socket1, 1, idmap);

        let params = Generation::SandyBridgeEp.pci2phy();
        let map = Pci2PhyMap::build(params, &[socket0, socket1], &regs).unwrap();

        assert_eq!(map.package_of(0, 0x3f), Some(0));
        assert_eq!(map.package_of(0, 0x7f), Some(1));
        // Buses below a ubox belong to it
        assert_eq!(map.package_of(0, 0x10), Some(0));
        assert_eq!(map.package_of(0, 0x40), Some(1));
        // Nothing above the highest ubox
        assert_eq!(map.package_of(0, 0x80), None);
        assert_eq!(map.package_of(1, 0x10), None);
    }

    #[test]
    fn test_forward_fill() {
        let mut map = Pci2PhyMap::new();
        map.set(0, 0x10, 0);
        map.set(0, 0x80, 1);
        map.fill(false);
        assert_eq!(map.package_of(0, 0x00), None);
        assert_eq!(map.package_of(0, 0x7f), Some(0));
        assert_eq!(map.package_of(0, 0xff), Some(1));
    }

    #[test]
    fn test_segments_are_independent() {
        let mut map = Pci2PhyMap::new();
        map.set(0, 0x7f, 0);
        map.set(1, 0x7f, 1);
        map.fill(true);
        assert_eq!(map.package_of(0, 0x00), Some(0));
        assert_eq!(map.package_of(1, 0x00), Some(1));
        assert_eq!(map.segments().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_single_socket() {
        let devices: Vec<PciDeviceInfo> = uncpmu_raw::arch::knl::SINGLE_SOCKET_DEVICES
            .iter()
            .zip([0x09u8, 0x0a])
            .map(|(&device_id, bus)| PciDeviceInfo {
                address: PciAddress::new(0, bus, 0, 0),
                vendor_id: INTEL_VENDOR_ID,
                device_id,
            })
            .collect();
        let params = Generation::KnightsLanding.pci2phy();
        let map = Pci2PhyMap::build(params, &devices, &NullRegisters).unwrap();
        assert_eq!(map.package_of(0, 0x09), Some(0));
        assert_eq!(map.package_of(0, 0x0a), Some(0));
        assert_eq!(map.package_of(0, 0x0b), None);

        let missing = Pci2PhyMap::build(params, &devices[..1], &NullRegisters);
        assert!(matches!(missing, Err(UncpmuError::PciError(_))));
    }

    #[test]
    fn test_read_error_aborts() {
        struct Failing;
        impl RegisterAccess for Failing {
            fn read_msr(&self, _cpu: u32, _msr: u32) -> Result<u64> {
                Ok(0)
            }
            fn write_msr(&self, _cpu: u32, _msr: u32, _value: u64) -> Result<()> {
                Ok(())
            }
            fn read32(&self, device: PciAddress, _offset: u32) -> Result<u32> {
                Err(UncpmuError::PciError(format!("{} unreadable", device)))
            }
            fn write32(&self, _device: PciAddress, _offset: u32, _value: u32) -> Result<()> {
                Ok(())
            }
        }
        let params = Generation::SandyBridgeEp.pci2phy();
        assert!(Pci2PhyMap::build(params, &[ubox(0, 0x3f)], &Failing).is_err());
    }
}
