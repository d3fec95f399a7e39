use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;

use crate::error::{Result, UncpmuError};

/// Pins the calling thread to one CPU and restores the previous mask on drop
///
/// MSR device files read the registers of the CPU the thread runs on for
/// package-scoped units, so every uncore MSR access runs under a guard.
pub struct AffinityGuard {
    old_affinity: CpuSet,
}

impl AffinityGuard {
    pub fn new(cpu: u32) -> Result<Self> {
        let old_affinity = sched_getaffinity(Pid::from_raw(0))
            .map_err(|e| UncpmuError::AffinityError(format!("Failed to get affinity: {e}")))?;

        let mut new_affinity = CpuSet::new();
        new_affinity.set(cpu as usize).map_err(|e| {
            UncpmuError::AffinityError(format!("Failed to set CPU {cpu} in set: {e}"))
        })?;

        sched_setaffinity(Pid::from_raw(0), &new_affinity).map_err(|e| {
            UncpmuError::AffinityError(format!("Failed to set affinity to CPU {cpu}: {e}"))
        })?;

        Ok(Self { old_affinity })
    }
}

impl Drop for AffinityGuard {
    fn drop(&mut self) {
        let _ = sched_setaffinity(Pid::from_raw(0), &self.old_affinity);
    }
}
