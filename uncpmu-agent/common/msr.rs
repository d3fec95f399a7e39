use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::sync::Arc;

use crate::common::affinity::AffinityGuard;
use crate::error::{Result, UncpmuError};

/// An open `/dev/cpu/N/msr`; the register address is the file offset
pub struct MsrHandle {
    file: File,
    cpu: u32,
}

impl MsrHandle {
    pub fn open(cpu: u32) -> Result<Self> {
        let path = format!("/dev/cpu/{cpu}/msr");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&path)
            .map_err(|e| UncpmuError::MsrError(format!("{path}: {e}")))?;

        tracing::debug!("Opened {}", path);
        Ok(Self { file, cpu })
    }

    pub fn read(&self, msr: u32) -> Result<u64> {
        let _pin = AffinityGuard::new(self.cpu)?;
        let mut buf = [0u8; 8];
        self.file
            .read_exact_at(&mut buf, u64::from(msr))
            .map_err(|e| self.error("read", msr, e))?;

        let value = u64::from_ne_bytes(buf);
        tracing::debug!("rdmsr cpu {} {:#x} = {:#018x}", self.cpu, msr, value);
        Ok(value)
    }

    pub fn write(&self, msr: u32, value: u64) -> Result<()> {
        let _pin = AffinityGuard::new(self.cpu)?;
        self.file
            .write_all_at(&value.to_ne_bytes(), u64::from(msr))
            .map_err(|e| self.error("write", msr, e))?;

        tracing::debug!("wrmsr cpu {} {:#x} <- {:#018x}", self.cpu, msr, value);
        Ok(())
    }

    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    fn error(&self, op: &str, msr: u32, e: std::io::Error) -> UncpmuError {
        UncpmuError::MsrError(format!("{op} of {msr:#x} on cpu {} failed: {e}", self.cpu))
    }
}

/// Handles to the MSR devices of every CPU that hosts a box, opened lazily
pub struct Msr {
    handles: RwLock<HashMap<u32, Arc<MsrHandle>>>,
}

static MSR: Lazy<Msr> = Lazy::new(|| Msr {
    handles: RwLock::new(HashMap::new()),
});

impl Msr {
    pub fn instance() -> &'static Msr {
        &MSR
    }

    fn handle(&self, cpu: u32) -> Result<Arc<MsrHandle>> {
        if let Some(handle) = self.handles.read().get(&cpu) {
            return Ok(Arc::clone(handle));
        }

        let mut handles = self.handles.write();
        if let Some(handle) = handles.get(&cpu) {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(MsrHandle::open(cpu)?);
        handles.insert(cpu, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn read(&self, cpu: u32, msr: u32) -> Result<u64> {
        self.handle(cpu)?.read(msr)
    }

    pub fn write(&self, cpu: u32, msr: u32, value: u64) -> Result<()> {
        self.handle(cpu)?.write(msr, value)
    }

    /// Close the device of a CPU that went offline
    pub fn forget(&self, cpu: u32) -> bool {
        self.handles.write().remove(&cpu).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_cpu_is_msr_error() {
        let result = MsrHandle::open(u32::MAX);
        assert!(matches!(result, Err(UncpmuError::MsrError(_))));
    }

    #[test]
    fn test_failed_open_is_not_cached() {
        assert!(Msr::instance().read(u32::MAX, 0xc00).is_err());
        assert!(!Msr::instance().forget(u32::MAX));
    }
}
