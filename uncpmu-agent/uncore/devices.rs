//! Companion PCI functions that carry no counters of their own

use std::collections::BTreeMap;

use parking_lot::RwLock;
use uncpmu_raw::ExtraDevice;

use crate::common::PciAddress;

/// Per-package table of probed companion devices
#[derive(Debug, Default)]
pub struct ExtraDevices {
    devices: RwLock<BTreeMap<(u32, usize), (ExtraDevice, PciAddress)>>,
}

impl ExtraDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `address`; returns the device it replaced
    pub fn insert(&self, package: u32, device: ExtraDevice, address: PciAddress) -> Option<PciAddress> {
        self.devices
            .write()
            .insert((package, device.index()), (device, address))
            .map(|(_, old)| old)
    }

    pub fn get(&self, package: u32, device: ExtraDevice) -> Option<PciAddress> {
        self.devices
            .read()
            .get(&(package, device.index()))
            .map(|(_, address)| *address)
    }

    /// Lowest-numbered package that has `device`
    pub fn first(&self, device: ExtraDevice) -> Option<(u32, PciAddress)> {
        self.devices
            .read()
            .iter()
            .find(|((_, idx), _)| *idx == device.index())
            .map(|((package, _), (_, address))| (*package, *address))
    }

    pub fn remove_address(&self, address: PciAddress) -> Option<(u32, ExtraDevice)> {
        let mut devices = self.devices.write();
        let key = devices
            .iter()
            .find(|(_, (_, a))| *a == address)
            .map(|(key, _)| *key)?;
        devices.remove(&key).map(|(device, _)| (key.0, device))
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup_remove() {
        let table = ExtraDevices::new();
        let filter = PciAddress::new(0, 0x7f, 8, 6);
        let pcu = PciAddress::new(0, 0xff, 30, 3);
        assert!(table.insert(1, ExtraDevice::QpiPort0Filter, filter).is_none());
        assert!(table.insert(1, ExtraDevice::Pcu3, pcu).is_none());

        assert_eq!(table.get(1, ExtraDevice::QpiPort0Filter), Some(filter));
        assert_eq!(table.get(0, ExtraDevice::QpiPort0Filter), None);
        assert_eq!(table.first(ExtraDevice::Pcu3), Some((1, pcu)));

        assert_eq!(table.remove_address(filter), Some((1, ExtraDevice::QpiPort0Filter)));
        assert_eq!(table.len(), 1);
        assert!(table.remove_address(filter).is_none());
    }
}
