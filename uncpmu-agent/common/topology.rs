use std::collections::{BTreeMap, BTreeSet};

use crate::config::parse_cpu_list;

/// CPU and package layout of the machine
pub trait Topology: Send + Sync {
    fn online_cpus(&self) -> Vec<u32>;
    fn package_of(&self, cpu: u32) -> Option<u32>;
    /// Cores per package
    fn max_cores(&self) -> usize;
}

/// Topology read from `/sys/devices/system/cpu`
#[derive(Debug, Default, Clone, Copy)]
pub struct SysfsTopology;

impl SysfsTopology {
    fn read_id(cpu: u32, name: &str) -> Option<u32> {
        let path = format!("/sys/devices/system/cpu/cpu{cpu}/topology/{name}");
        std::fs::read_to_string(path).ok()?.trim().parse().ok()
    }
}

impl Topology for SysfsTopology {
    fn online_cpus(&self) -> Vec<u32> {
        std::fs::read_to_string("/sys/devices/system/cpu/online")
            .ok()
            .and_then(|s| parse_cpu_list(&s))
            .unwrap_or_else(|| {
                tracing::warn!("Failed to detect online CPUs, using default: 0");
                vec![0]
            })
    }

    fn package_of(&self, cpu: u32) -> Option<u32> {
        Self::read_id(cpu, "physical_package_id")
    }

    fn max_cores(&self) -> usize {
        let mut cores: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
        for cpu in self.online_cpus() {
            if let (Some(package), Some(core)) =
                (self.package_of(cpu), Self::read_id(cpu, "core_id"))
            {
                cores.entry(package).or_default().insert(core);
            }
        }
        cores.values().map(BTreeSet::len).max().unwrap_or(1)
    }
}

/// Fixed layout: `cpus[i]` lives in `packages[i]`
#[derive(Debug, Clone)]
pub struct FixedTopology {
    pub cpus: Vec<(u32, u32)>,
    pub cores_per_package: usize,
}

impl FixedTopology {
    /// `packages` packages of `cpus_per_package` consecutive CPUs each
    pub fn uniform(packages: u32, cpus_per_package: u32) -> Self {
        let cpus = (0..packages)
            .flat_map(|p| (0..cpus_per_package).map(move |c| (p * cpus_per_package + c, p)))
            .collect();
        Self {
            cpus,
            cores_per_package: cpus_per_package as usize,
        }
    }
}

impl Topology for FixedTopology {
    fn online_cpus(&self) -> Vec<u32> {
        self.cpus.iter().map(|&(cpu, _)| cpu).collect()
    }

    fn package_of(&self, cpu: u32) -> Option<u32> {
        self.cpus
            .iter()
            .find(|&&(c, _)| c == cpu)
            .map(|&(_, package)| package)
    }

    fn max_cores(&self) -> usize {
        self.cores_per_package
    }
}
