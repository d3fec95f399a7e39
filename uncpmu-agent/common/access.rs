//! Register access backends
//!
//! The engine only ever reads and writes registers through
//! [`RegisterAccess`]: 64-bit MSRs addressed by CPU and 32-bit PCI
//! configuration-space words addressed by function. [`HardwareAccess`] goes
//! to the device files, [`MemoryRegisters`] keeps everything in memory and
//! records each write, and [`NullRegisters`] backs fake boxes.

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::common::msr::Msr;
use crate::common::pci::{Pci, PciAddress};
use crate::error::Result;

pub trait RegisterAccess: Send + Sync {
    fn read_msr(&self, cpu: u32, msr: u32) -> Result<u64>;
    fn write_msr(&self, cpu: u32, msr: u32, value: u64) -> Result<()>;
    fn read32(&self, device: PciAddress, offset: u32) -> Result<u32>;
    fn write32(&self, device: PciAddress, offset: u32, value: u32) -> Result<()>;

    /// Drop whatever is held open for a CPU that went offline
    fn release_cpu(&self, _cpu: u32) {}

    /// Drop whatever is held open for a removed PCI function
    fn release_device(&self, _device: PciAddress) {}
}

/// `/dev/cpu/N/msr` and `/proc/bus/pci` backed access
#[derive(Debug, Default, Clone, Copy)]
pub struct HardwareAccess;

impl RegisterAccess for HardwareAccess {
    fn read_msr(&self, cpu: u32, msr: u32) -> Result<u64> {
        Msr::instance().read(cpu, msr)
    }

    fn write_msr(&self, cpu: u32, msr: u32, value: u64) -> Result<()> {
        Msr::instance().write(cpu, msr, value)
    }

    fn read32(&self, device: PciAddress, offset: u32) -> Result<u32> {
        Pci::instance().read32(device, offset)
    }

    fn write32(&self, device: PciAddress, offset: u32, value: u32) -> Result<()> {
        Pci::instance().write32(device, offset, value)
    }

    fn release_cpu(&self, cpu: u32) {
        if Msr::instance().forget(cpu) {
            tracing::debug!("Closed MSR device of CPU {}", cpu);
        }
    }

    fn release_device(&self, device: PciAddress) {
        Pci::instance().forget(device);
    }
}

/// Reads as zero and drops every write
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRegisters;

impl RegisterAccess for NullRegisters {
    fn read_msr(&self, _cpu: u32, _msr: u32) -> Result<u64> {
        Ok(0)
    }

    fn write_msr(&self, _cpu: u32, _msr: u32, _value: u64) -> Result<()> {
        Ok(())
    }

    fn read32(&self, _device: PciAddress, _offset: u32) -> Result<u32> {
        Ok(0)
    }

    fn write32(&self, _device: PciAddress, _offset: u32, _value: u32) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKey {
    Msr { cpu: u32, msr: u32 },
    Pci { device: PciAddress, offset: u32 },
}

/// One recorded register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub key: RegisterKey,
    pub value: u64,
}

#[derive(Default)]
struct MemoryState {
    values: HashMap<RegisterKey, u64>,
    writes: Vec<WriteRecord>,
}

/// In-memory register file that logs every write in order
#[derive(Default)]
pub struct MemoryRegisters {
    state: Mutex<MemoryState>,
}

impl MemoryRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Program a value without logging it as a write
    pub fn set(&self, key: RegisterKey, value: u64) {
        self.state.lock().values.insert(key, value);
    }

    pub fn get(&self, key: RegisterKey) -> u64 {
        self.state.lock().values.get(&key).copied().unwrap_or(0)
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    /// Writes that hit `key`, oldest first
    pub fn writes_to(&self, key: RegisterKey) -> Vec<u64> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.key == key)
            .map(|w| w.value)
            .collect()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    fn record(&self, key: RegisterKey, value: u64) {
        let mut state = self.state.lock();
        state.values.insert(key, value);
        state.writes.push(WriteRecord { key, value });
    }
}

impl RegisterAccess for MemoryRegisters {
    fn read_msr(&self, cpu: u32, msr: u32) -> Result<u64> {
        Ok(self.get(RegisterKey::Msr { cpu, msr }))
    }

    fn write_msr(&self, cpu: u32, msr: u32, value: u64) -> Result<()> {
        self.record(RegisterKey::Msr { cpu, msr }, value);
        Ok(())
    }

    fn read32(&self, device: PciAddress, offset: u32) -> Result<u32> {
        Ok(self.get(RegisterKey::Pci { device, offset }) as u32)
    }

    fn write32(&self, device: PciAddress, offset: u32, value: u32) -> Result<()> {
        self.record(RegisterKey::Pci { device, offset }, u64::from(value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_registers_record_writes() {
        let regs = MemoryRegisters::new();
        let dev = PciAddress::new(0, 0x7f, 0x10, 1);

        regs.set(RegisterKey::Msr { cpu: 0, msr: 0xc16 }, 42);
        assert_eq!(regs.read_msr(0, 0xc16).unwrap(), 42);
        assert!(regs.writes().is_empty());

        regs.write_msr(0, 0xc10, 0x40_0000).unwrap();
        regs.write32(dev, 0xf4, 0x10003).unwrap();
        regs.write32(dev, 0xf4, 0x10103).unwrap();

        assert_eq!(regs.writes().len(), 3);
        assert_eq!(
            regs.writes_to(RegisterKey::Pci {
                device: dev,
                offset: 0xf4
            }),
            vec![0x10003, 0x10103]
        );
        assert_eq!(regs.read32(dev, 0xf4).unwrap(), 0x10103);
    }

    #[test]
    fn test_null_registers() {
        let regs = NullRegisters;
        regs.write_msr(3, 0xd10, !0).unwrap();
        assert_eq!(regs.read_msr(3, 0xd10).unwrap(), 0);
    }
}
