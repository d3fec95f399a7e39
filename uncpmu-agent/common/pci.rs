use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, UncpmuError};

pub const INTEL_VENDOR_ID: u16 = 0x8086;

/// Location of a PCI function: segment (domain), bus, device, function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PciAddress {
    pub segment: u32,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    pub fn new(segment: u32, bus: u8, device: u8, function: u8) -> Self {
        Self {
            segment,
            bus,
            device,
            function,
        }
    }
}

impl std::fmt::Display for PciAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{}",
            self.segment, self.bus, self.device, self.function
        )
    }
}

/// A discovered PCI function and its identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDeviceInfo {
    pub address: PciAddress,
    pub vendor_id: u16,
    pub device_id: u16,
}

fn pci_root() -> PathBuf {
    std::env::var_os("UNCPMU_PCI_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/proc/bus/pci"))
}

pub struct PciHandle {
    file: parking_lot::Mutex<File>,
    address: PciAddress,
}

impl PciHandle {
    pub fn new(address: PciAddress) -> Result<Self> {
        let path = Self::get_pci_path(&pci_root(), address);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                UncpmuError::PciError(format!("Failed to open PCI device {address}: {e}"))
            })?;

        Ok(Self {
            file: parking_lot::Mutex::new(file),
            address,
        })
    }

    fn get_pci_path(root: &Path, address: PciAddress) -> PathBuf {
        let bus_dir = if address.segment > 0 {
            format!("{:04x}:{:02x}", address.segment, address.bus)
        } else {
            format!("{:02x}", address.bus)
        };
        root.join(bus_dir)
            .join(format!("{:02x}.{}", address.device, address.function))
    }

    pub fn read32(&self, offset: u32) -> Result<u32> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(u64::from(offset))).map_err(|e| {
            UncpmuError::PciError(format!(
                "Failed to seek to offset 0x{offset:x} of {}: {e}",
                self.address
            ))
        })?;

        let mut buffer = [0u8; 4];
        file.read_exact(&mut buffer).map_err(|e| {
            UncpmuError::PciError(format!(
                "Failed to read at offset 0x{offset:x} of {}: {e}",
                self.address
            ))
        })?;

        let value = u32::from_le_bytes(buffer);
        tracing::debug!("PCI read: {} +0x{:03x} = 0x{:08x}", self.address, offset, value);
        Ok(value)
    }

    pub fn write32(&self, offset: u32, value: u32) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(u64::from(offset))).map_err(|e| {
            UncpmuError::PciError(format!(
                "Failed to seek to offset 0x{offset:x} of {}: {e}",
                self.address
            ))
        })?;

        file.write_all(&value.to_le_bytes()).map_err(|e| {
            UncpmuError::PciError(format!(
                "Failed to write at offset 0x{offset:x} of {}: {e}",
                self.address
            ))
        })?;

        tracing::debug!("PCI write: {} +0x{:03x} <- 0x{:08x}", self.address, offset, value);
        Ok(())
    }

    pub fn address(&self) -> PciAddress {
        self.address
    }
}

/// Process-wide cache of open configuration-space handles
pub struct Pci {
    handles: RwLock<HashMap<PciAddress, Arc<PciHandle>>>,
}

impl Pci {
    fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn instance() -> &'static Pci {
        static INSTANCE: Lazy<Pci> = Lazy::new(Pci::new);
        &INSTANCE
    }

    fn get_or_create_handle(&self, address: PciAddress) -> Result<Arc<PciHandle>> {
        {
            let handles = self.handles.read();
            if let Some(handle) = handles.get(&address) {
                return Ok(Arc::clone(handle));
            }
        }

        let mut handles = self.handles.write();
        if let Some(handle) = handles.get(&address) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(PciHandle::new(address)?);
        handles.insert(address, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn read32(&self, address: PciAddress, offset: u32) -> Result<u32> {
        let handle = self.get_or_create_handle(address)?;
        handle.read32(offset)
    }

    pub fn write32(&self, address: PciAddress, offset: u32, value: u32) -> Result<()> {
        let handle = self.get_or_create_handle(address)?;
        handle.write32(offset, value)
    }

    /// Drop a cached handle after its device went away
    pub fn forget(&self, address: PciAddress) {
        self.handles.write().remove(&address);
    }
}

/// Parse a bus directory name: `"3f"` or `"0001:3f"`
fn parse_bus_dir(name: &str) -> Option<(u32, u8)> {
    match name.split_once(':') {
        Some((segment, bus)) => Some((
            u32::from_str_radix(segment, 16).ok()?,
            u8::from_str_radix(bus, 16).ok()?,
        )),
        None => Some((0, u8::from_str_radix(name, 16).ok()?)),
    }
}

/// Parse a function file name: `"0e.1"`
fn parse_devfn(name: &str) -> Option<(u8, u8)> {
    let (device, function) = name.split_once('.')?;
    Some((
        u8::from_str_radix(device, 16).ok()?,
        function.parse().ok()?,
    ))
}

/// Enumerate every function under a `/proc/bus/pci` style tree
pub fn scan_devices_in(root: &Path) -> Result<Vec<PciDeviceInfo>> {
    let mut devices = Vec::new();

    for bus_entry in std::fs::read_dir(root)? {
        let bus_entry = bus_entry?;
        if !bus_entry.file_type()?.is_dir() {
            continue;
        }
        let Some((segment, bus)) = bus_entry.file_name().to_str().and_then(parse_bus_dir) else {
            continue;
        };

        for fn_entry in std::fs::read_dir(bus_entry.path())? {
            let fn_entry = fn_entry?;
            let Some((device, function)) = fn_entry.file_name().to_str().and_then(parse_devfn)
            else {
                continue;
            };

            let mut header = [0u8; 4];
            if File::open(fn_entry.path())
                .and_then(|mut f| f.read_exact(&mut header))
                .is_err()
            {
                tracing::debug!("Skipping unreadable PCI function {:?}", fn_entry.path());
                continue;
            }
            let id = u32::from_le_bytes(header);
            devices.push(PciDeviceInfo {
                address: PciAddress::new(segment, bus, device, function),
                vendor_id: (id & 0xffff) as u16,
                device_id: (id >> 16) as u16,
            });
        }
    }

    devices.sort_by_key(|d| d.address);
    tracing::info!("Found {} PCI functions under {:?}", devices.len(), root);
    Ok(devices)
}

pub fn scan_devices() -> Result<Vec<PciDeviceInfo>> {
    scan_devices_in(&pci_root())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pci_path_layout() {
        let root = Path::new("/proc/bus/pci");
        assert_eq!(
            PciHandle::get_pci_path(root, PciAddress::new(0, 0x7f, 0x0e, 1)),
            PathBuf::from("/proc/bus/pci/7f/0e.1")
        );
        assert_eq!(
            PciHandle::get_pci_path(root, PciAddress::new(1, 0x16, 0x08, 2)),
            PathBuf::from("/proc/bus/pci/0001:16/08.2")
        );
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(parse_bus_dir("ff"), Some((0, 0xff)));
        assert_eq!(parse_bus_dir("0002:3a"), Some((2, 0x3a)));
        assert_eq!(parse_bus_dir("devices"), None);
        assert_eq!(parse_devfn("1e.3"), Some((0x1e, 3)));
        assert_eq!(parse_devfn("devices"), None);
    }

    #[test]
    fn test_scan_devices_in_tree() {
        let root = std::env::temp_dir().join(format!("uncpmu-pci-{}", std::process::id()));
        let bus = root.join("7f");
        std::fs::create_dir_all(&bus).unwrap();
        let id: u32 = (0x3ce0 << 16) | 0x8086;
        std::fs::write(bus.join("0e.1"), id.to_le_bytes()).unwrap();
        std::fs::write(root.join("devices"), b"").unwrap();

        let devices = scan_devices_in(&root).unwrap();
        std::fs::remove_dir_all(&root).unwrap();

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].vendor_id, INTEL_VENDOR_ID);
        assert_eq!(devices[0].device_id, 0x3ce0);
        assert_eq!(devices[0].address, PciAddress::new(0, 0x7f, 0x0e, 1));
    }
}
