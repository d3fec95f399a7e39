//! Engine context: PMUs, their boxes and the CPU/PCI lifecycle around them
//!
//! Bring-up runs in a fixed order: PCI discovery (bus map, then one box per
//! matched function), MSR unit sizing, then every online CPU is brought in
//! as if it had just been hot-plugged. The first CPU seen on a package
//! becomes its collector; MSR boxes live as long as one CPU of their
//! package is online.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use uncpmu_raw::arch::{hswep, skx};
use uncpmu_raw::format::{encode_terms, RawConfig};
use uncpmu_raw::{EventDesc, ExtraDevice, Generation, PciUnitKind, UncoreType};

use crate::common::pci::INTEL_VENDOR_ID;
use crate::common::{PciAddress, PciDeviceInfo, RegisterAccess, Topology};
use crate::config::EngineConfig;
use crate::error::{Result, UncpmuError};
use crate::uncore::box_state::{BoxTarget, UncoreBox};
use crate::uncore::devices::ExtraDevices;
use crate::uncore::pci2phy::Pci2PhyMap;

/// Name a PMU is published under
pub fn pmu_name(ty: &UncoreType, pmu_idx: usize, num_boxes: usize) -> String {
    match (num_boxes, ty.name) {
        (1, "") => "uncore".to_string(),
        (1, name) => format!("uncore_{}", name),
        (_, name) => format!("uncore_{}_{}", name, pmu_idx),
    }
}

/// Resolve a named alias or a `term=value,...` list against a unit type
pub fn resolve_event(ty: &UncoreType, spec: &str) -> Result<(RawConfig, Option<&'static EventDesc>)> {
    match ty.event_desc(spec.trim()) {
        Some(desc) => Ok((encode_terms(ty.formats, desc.config)?, Some(desc))),
        None => Ok((encode_terms(ty.formats, spec)?, None)),
    }
}

/// One box index of a unit type, with an instance per package
pub struct UncorePmu {
    ty: &'static UncoreType,
    pmu_idx: usize,
    name: String,
    boxes: RwLock<BTreeMap<u32, Arc<UncoreBox>>>,
}

impl UncorePmu {
    fn new(ty: &'static UncoreType, pmu_idx: usize, num_boxes: usize) -> Self {
        Self {
            ty,
            pmu_idx,
            name: pmu_name(ty, pmu_idx, num_boxes),
            boxes: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn ty(&self) -> &'static UncoreType {
        self.ty
    }

    pub fn pmu_idx(&self) -> usize {
        self.pmu_idx
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn box_on(&self, package: u32) -> Option<Arc<UncoreBox>> {
        self.boxes.read().get(&package).cloned()
    }

    pub fn boxes(&self) -> Vec<Arc<UncoreBox>> {
        self.boxes.read().values().cloned().collect()
    }

    /// Box of a package, created under the map's write lock when missing
    fn box_or_insert_with(
        &self,
        package: u32,
        create: impl FnOnce() -> Arc<UncoreBox>,
    ) -> Arc<UncoreBox> {
        self.boxes.write().entry(package).or_insert_with(create).clone()
    }

    fn insert(&self, package: u32, uncore_box: Arc<UncoreBox>) -> bool {
        let mut boxes = self.boxes.write();
        if boxes.contains_key(&package) {
            return false;
        }
        boxes.insert(package, uncore_box);
        true
    }

    fn remove(&self, package: u32) -> Option<Arc<UncoreBox>> {
        self.boxes.write().remove(&package)
    }
}

/// What `pci_probe` did with a function
#[derive(Debug)]
pub enum ProbeOutcome {
    Box(Arc<UncoreBox>),
    Extra { package: u32, device: ExtraDevice },
    /// Not a function this generation uses
    Ignored,
}

pub struct UncoreContext {
    generation: Generation,
    config: EngineConfig,
    access: Arc<dyn RegisterAccess>,
    topology: Arc<dyn Topology>,
    extras: Arc<ExtraDevices>,
    pci2phy: OnceCell<Pci2PhyMap>,
    msr_pmus: RwLock<Vec<Vec<Arc<UncorePmu>>>>,
    pci_pmus: RwLock<Vec<Vec<Arc<UncorePmu>>>>,
    /// Collector CPU of each package
    collectors: Mutex<BTreeMap<u32, u32>>,
    online: Mutex<BTreeSet<u32>>,
    /// Held for a whole hotplug or probe callback so box refcounts, map
    /// membership and collector moves change together
    hotplug: Mutex<()>,
}

impl UncoreContext {
    pub fn new(
        generation: Generation,
        config: EngineConfig,
        access: Arc<dyn RegisterAccess>,
        topology: Arc<dyn Topology>,
    ) -> Self {
        Self {
            generation,
            config,
            access,
            topology,
            extras: Arc::new(ExtraDevices::new()),
            pci2phy: OnceCell::new(),
            msr_pmus: RwLock::new(Vec::new()),
            pci_pmus: RwLock::new(Vec::new()),
            collectors: Mutex::new(BTreeMap::new()),
            online: Mutex::new(BTreeSet::new()),
            hotplug: Mutex::new(()),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn extras(&self) -> &ExtraDevices {
        &self.extras
    }

    pub fn pci2phy(&self) -> Option<&Pci2PhyMap> {
        self.pci2phy.get()
    }

    /// Full bring-up; PCI trouble only disables the PCI units
    pub fn init(&self, devices: &[PciDeviceInfo]) -> Result<()> {
        if let Err(e) = self.pci_init(devices) {
            tracing::warn!("PCI uncore units unavailable: {}", e);
        }
        self.cpu_init(devices)?;
        for cpu in self.topology.online_cpus() {
            self.cpu_online(cpu)?;
        }
        tracing::info!(
            "{} uncore ready: {} PMUs, {} boxes",
            self.generation,
            self.pmus().len(),
            self.boxes().len()
        );
        Ok(())
    }

    /// Map buses to packages and create a box for every matching function
    pub fn pci_init(&self, devices: &[PciDeviceInfo]) -> Result<usize> {
        let map = Pci2PhyMap::build(self.generation.pci2phy(), devices, self.access.as_ref())?;
        if self.pci2phy.set(map).is_err() {
            return Err(UncpmuError::ConfigError("PCI units already initialised".to_string()));
        }

        *self.pci_pmus.write() = self
            .generation
            .pci_uncores()
            .iter()
            .map(|&ty| {
                (0..ty.num_boxes)
                    .map(|i| Arc::new(UncorePmu::new(ty, i, ty.num_boxes)))
                    .collect()
            })
            .collect();

        let mut probed = 0;
        for device in devices {
            match self.pci_probe(device) {
                Ok(ProbeOutcome::Box(_)) => probed += 1,
                Ok(_) => {}
                Err(e) => tracing::error!("Failed to probe {}: {}", device.address, e),
            }
        }
        tracing::debug!("Probed {} PCI uncore boxes", probed);
        Ok(probed)
    }

    /// Box counts of the MSR unit types for this machine
    pub fn msr_box_counts(&self, devices: &[PciDeviceInfo]) -> Vec<usize> {
        let types = self.generation.msr_uncores();
        let mut counts: Vec<usize> = types.iter().map(|ty| ty.num_boxes).collect();
        let position = |target: &UncoreType| types.iter().position(|ty| std::ptr::eq(*ty, target));

        if let Some(i) = self.generation.cbox_clamped().and_then(position) {
            counts[i] = counts[i].min(self.topology.max_cores());
        }

        if let Some(i) = self.generation.sbox_capid_probe().and_then(position) {
            if let Some((_, pcu3)) = self.extras.first(ExtraDevice::Pcu3) {
                match self.access.read32(pcu3, hswep::pci::PCU3_CAPID4) {
                    Ok(capid4) => {
                        if let Some(n) = hswep::sbox_count_from_capid4(capid4) {
                            counts[i] = n;
                        }
                    }
                    Err(e) => tracing::warn!("Failed to read CAPID4 from {}: {}", pcu3, e),
                }
            }
        }

        if let Some(i) = self.generation.cha_from_topology().and_then(position) {
            counts[i] = count_cha(devices);
            if counts[i] == 0 {
                tracing::warn!("No CHA devices found; CHA units disabled");
            }
        }
        counts
    }

    pub fn cpu_init(&self, devices: &[PciDeviceInfo]) -> Result<()> {
        let counts = self.msr_box_counts(devices);
        *self.msr_pmus.write() = self
            .generation
            .msr_uncores()
            .iter()
            .zip(counts)
            .map(|(&ty, n)| (0..n).map(|i| Arc::new(UncorePmu::new(ty, i, n))).collect())
            .collect();
        Ok(())
    }

    /// Every PMU, MSR units first
    pub fn pmus(&self) -> Vec<Arc<UncorePmu>> {
        let msr = self.msr_pmus.read();
        let pci = self.pci_pmus.read();
        msr.iter().chain(pci.iter()).flatten().cloned().collect()
    }

    pub fn find_pmu(&self, name: &str) -> Option<Arc<UncorePmu>> {
        self.pmus().into_iter().find(|p| p.name() == name)
    }

    pub fn boxes(&self) -> Vec<Arc<UncoreBox>> {
        self.pmus().iter().flat_map(|p| p.boxes()).collect()
    }

    pub fn find_box(&self, pmu: &str, package: u32) -> Result<Arc<UncoreBox>> {
        let found = self
            .find_pmu(pmu)
            .ok_or_else(|| UncpmuError::InvalidEvent(format!("unknown PMU {}", pmu)))?;
        found.box_on(package).ok_or_else(|| {
            UncpmuError::InvalidEvent(format!("{} has no box on package {}", pmu, package))
        })
    }

    pub fn collector(&self, package: u32) -> Option<u32> {
        self.collectors.lock().get(&package).copied()
    }

    /// Packages with at least one online CPU
    pub fn packages(&self) -> Vec<u32> {
        self.collectors.lock().keys().copied().collect()
    }

    fn change_context(&self, package: u32, cpu: Option<u32>) {
        for b in self.pmus().iter().filter_map(|p| p.box_on(package)) {
            b.set_cpu(cpu);
        }
    }

    pub fn cpu_online(&self, cpu: u32) -> Result<()> {
        let _hotplug = self.hotplug.lock();
        let package = self.topology.package_of(cpu).ok_or_else(|| {
            UncpmuError::ConfigError(format!("CPU {} has no package", cpu))
        })?;
        if !self.online.lock().insert(cpu) {
            return Ok(());
        }

        let (collector, new_collector) = {
            let mut collectors = self.collectors.lock();
            match collectors.get(&package) {
                Some(&c) => (c, false),
                None => {
                    collectors.insert(package, cpu);
                    (cpu, true)
                }
            }
        };

        for pmu in self.msr_pmus.read().iter().flatten() {
            let b = pmu.box_or_insert_with(package, || {
                let b = UncoreBox::new(
                    pmu.ty,
                    pmu.pmu_idx,
                    package,
                    BoxTarget::Msr,
                    self.access.clone(),
                    self.extras.clone(),
                    self.config.ref_limit,
                );
                b.set_cpu(Some(collector));
                Arc::new(b)
            });
            if b.get_ref() == 1 {
                b.init_box();
            }
        }

        if new_collector {
            tracing::debug!("CPU {} collects package {}", cpu, package);
            self.change_context(package, Some(cpu));
        }
        Ok(())
    }

    pub fn cpu_offline(&self, cpu: u32) -> Result<()> {
        let _hotplug = self.hotplug.lock();
        let package = self.topology.package_of(cpu).ok_or_else(|| {
            UncpmuError::ConfigError(format!("CPU {} has no package", cpu))
        })?;
        if !self.online.lock().remove(&cpu) {
            return Ok(());
        }

        // Box exit writes still go through the departing CPU
        for pmu in self.msr_pmus.read().iter().flatten() {
            let Some(b) = pmu.box_on(package) else {
                continue;
            };
            if b.put_ref() == 0 {
                b.exit_box();
                pmu.remove(package);
            }
        }

        let was_collector = self.collector(package) == Some(cpu);
        if was_collector {
            let target = {
                let online = self.online.lock();
                online
                    .iter()
                    .copied()
                    .find(|&c| self.topology.package_of(c) == Some(package))
            };
            {
                let mut collectors = self.collectors.lock();
                match target {
                    Some(t) => collectors.insert(package, t),
                    None => collectors.remove(&package),
                };
            }
            tracing::debug!("Package {} collector moved from CPU {} to {:?}", package, cpu, target);
            self.change_context(package, target);
        }
        self.access.release_cpu(cpu);
        Ok(())
    }

    pub fn pci_probe(&self, device: &PciDeviceInfo) -> Result<ProbeOutcome> {
        let _hotplug = self.hotplug.lock();
        let addr = device.address;
        if device.vendor_id != INTEL_VENDOR_ID {
            return Ok(ProbeOutcome::Ignored);
        }
        let Some(unit) = self
            .generation
            .match_pci_unit(device.device_id, addr.device, addr.function)
        else {
            return Ok(ProbeOutcome::Ignored);
        };

        let package = self
            .pci2phy()
            .and_then(|map| map.package_of(addr.segment, addr.bus))
            .ok_or_else(|| UncpmuError::PciError(format!("no package for bus of {}", addr)))?;

        match unit.kind {
            PciUnitKind::Extra(extra) => {
                if let Some(old) = self.extras.insert(package, extra, addr) {
                    tracing::warn!("{:?} of package {} replaced {} with {}", extra, package, old, addr);
                }
                Ok(ProbeOutcome::Extra {
                    package,
                    device: extra,
                })
            }
            PciUnitKind::Box {
                type_index,
                box_index,
            } => {
                let pmu = self
                    .pci_pmus
                    .read()
                    .get(type_index)
                    .and_then(|pmus| pmus.get(box_index))
                    .cloned()
                    .ok_or_else(|| {
                        UncpmuError::PciError(format!(
                            "{} maps to box {} of type {} which does not exist",
                            addr, box_index, type_index
                        ))
                    })?;

                let b = Arc::new(UncoreBox::new(
                    pmu.ty,
                    box_index,
                    package,
                    BoxTarget::Pci(addr),
                    self.access.clone(),
                    self.extras.clone(),
                    self.config.ref_limit,
                ));
                b.set_cpu(self.collector(package));
                if !pmu.insert(package, b.clone()) {
                    return Err(UncpmuError::PciError(format!(
                        "{} already has a box on package {}",
                        pmu.name(),
                        package
                    )));
                }
                b.init_box();
                tracing::debug!("{} on package {} at {}", pmu.name(), package, addr);
                Ok(ProbeOutcome::Box(b))
            }
        }
    }

    pub fn pci_remove(&self, addr: PciAddress) -> bool {
        let _hotplug = self.hotplug.lock();
        let removed = self.extras.remove_address(addr).is_some() || self.remove_pci_box(addr);
        if removed {
            self.access.release_device(addr);
        }
        removed
    }

    fn remove_pci_box(&self, addr: PciAddress) -> bool {
        for pmu in self.pci_pmus.read().iter().flatten() {
            let found = pmu
                .boxes()
                .into_iter()
                .find(|b| b.target() == BoxTarget::Pci(addr));
            if let Some(b) = found {
                b.exit_box();
                pmu.remove(b.package());
                return true;
            }
        }
        false
    }

    /// Read every running counter of every box
    pub fn update_all(&self) -> usize {
        self.boxes().iter().map(|b| b.update_all()).sum()
    }

    /// Tear down PCI units, then MSR units
    pub fn exit(&self) {
        let _hotplug = self.hotplug.lock();
        for pmu in self.pci_pmus.read().iter().flatten() {
            for b in pmu.boxes() {
                b.exit_box();
                pmu.remove(b.package());
            }
        }
        for pmu in self.msr_pmus.read().iter().flatten() {
            for b in pmu.boxes() {
                b.exit_box();
                pmu.remove(b.package());
            }
        }
        self.collectors.lock().clear();
        self.online.lock().clear();
    }
}

/// CHA devices on the first bus that carries any
fn count_cha(devices: &[PciDeviceInfo]) -> usize {
    let mut chas = devices
        .iter()
        .filter(|d| d.vendor_id == INTEL_VENDOR_ID && d.device_id == skx::CHA_DEVICE_ID)
        .peekable();
    let Some(first) = chas.peek().map(|d| (d.address.segment, d.address.bus)) else {
        return 0;
    };
    chas.take_while(|d| (d.address.segment, d.address.bus) == first)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{FixedTopology, MemoryRegisters, RegisterKey};
    use uncpmu_raw::arch::{ivbep, snbep};
    use uncpmu_raw::register::bits::BOX_CTL_FRZ;

    fn context(generation: Generation, topology: FixedTopology) -> (UncoreContext, Arc<MemoryRegisters>) {
        let regs = Arc::new(MemoryRegisters::new());
        let ctx = UncoreContext::new(
            generation,
            EngineConfig::default(),
            regs.clone(),
            Arc::new(topology),
        );
        (ctx, regs)
    }

    fn device(bus: u8, dev: u8, func: u8, device_id: u16) -> PciDeviceInfo {
        PciDeviceInfo {
            address: PciAddress::new(0, bus, dev, func),
            vendor_id: INTEL_VENDOR_ID,
            device_id,
        }
    }

    /// One ubox per package, node id == package
    fn uboxes(regs: &MemoryRegisters, ubox_id: u16, buses: &[u8]) -> Vec<PciDeviceInfo> {
        let idmap: u64 = (0..8u64).fold(0, |m, i| m | (i << (3 * i)));
        buses
            .iter()
            .enumerate()
            .map(|(node, &bus)| {
                let ubox = device(bus, 13, 5, ubox_id);
                let key = |offset| RegisterKey::Pci {
                    device: ubox.address,
                    offset,
                };
                regs.set(key(snbep::pci::CPUNODEID), node as u64);
                regs.set(key(snbep::pci::GIDNIDMAP), idmap);
                ubox
            })
            .collect()
    }

    #[test]
    fn test_pmu_names() {
        assert_eq!(pmu_name(&snbep::CBOX, 3, 8), "uncore_cbox_3");
        assert_eq!(pmu_name(&snbep::PCU, 0, 1), "uncore_pcu");
        let unnamed = UncoreType {
            name: "",
            ..UncoreType::DEFAULT
        };
        assert_eq!(pmu_name(&unnamed, 0, 1), "uncore");
    }

    #[test]
    fn test_resolve_event_alias_and_terms() {
        let (raw, desc) = resolve_event(&snbep::IMC, "cas_count_read").unwrap();
        assert_eq!(raw.config & 0xff, 0x04);
        assert!(desc.is_some());

        let (raw, desc) = resolve_event(&snbep::CBOX, "event=0x34,umask=0x03").unwrap();
        assert_eq!(raw.config, 0x0334);
        assert!(desc.is_none());

        assert!(resolve_event(&snbep::CBOX, "bogus=1").is_err());
    }

    #[test]
    fn test_cbox_clamped_to_cores() {
        let (ctx, _) = context(Generation::SandyBridgeEp, FixedTopology::uniform(1, 4));
        ctx.init(&[]).unwrap();
        let cboxes: Vec<_> = ctx
            .pmus()
            .into_iter()
            .filter(|p| p.ty().name == "cbox")
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(cboxes, vec!["uncore_cbox_0", "uncore_cbox_1", "uncore_cbox_2", "uncore_cbox_3"]);
        assert_eq!(snbep::CBOX.num_boxes, 8);
    }

    #[test]
    fn test_boxes_init_once_per_package() {
        let (ctx, regs) = context(Generation::SandyBridgeEp, FixedTopology::uniform(2, 4));
        ctx.init(&[]).unwrap();

        assert_eq!(ctx.packages(), vec![0, 1]);
        assert_eq!(ctx.collector(0), Some(0));
        assert_eq!(ctx.collector(1), Some(4));

        let cbox0 = ctx.find_box("uncore_cbox_0", 1).unwrap();
        assert_eq!(cbox0.refcnt(), 4);
        assert_eq!(cbox0.cpu(), Some(4));
        let key = RegisterKey::Msr {
            cpu: 4,
            msr: cbox0.registers().box_ctl(),
        };
        assert_eq!(regs.writes_to(key), vec![0x10003]);

        ctx.exit();
        assert_eq!(regs.writes_to(key).len(), 2);
        assert_ne!(regs.get(key) & BOX_CTL_FRZ, 0);
        assert!(!cbox0.is_initiated());
        assert!(ctx.boxes().is_empty());
    }

    #[test]
    fn test_collector_migrates_on_offline() {
        let (ctx, regs) = context(Generation::SandyBridgeEp, FixedTopology::uniform(2, 2));
        ctx.init(&[]).unwrap();
        let pcu = ctx.find_box("uncore_pcu", 0).unwrap();

        ctx.cpu_offline(0).unwrap();
        assert_eq!(ctx.collector(0), Some(1));
        assert_eq!(pcu.cpu(), Some(1));
        assert_eq!(pcu.refcnt(), 1);
        assert!(pcu.is_initiated());

        regs.clear_writes();
        ctx.cpu_offline(1).unwrap();
        assert_eq!(ctx.collector(0), None);
        assert!(regs
            .writes()
            .iter()
            .all(|w| matches!(w.key, RegisterKey::Msr { cpu: 1, .. })));
        assert!(!pcu.is_initiated());
        assert!(ctx.find_box("uncore_pcu", 0).is_err());
        assert!(ctx.find_box("uncore_pcu", 1).is_ok());

        // Coming back creates and initialises a fresh box
        regs.clear_writes();
        ctx.cpu_online(1).unwrap();
        let fresh = ctx.find_box("uncore_pcu", 0).unwrap();
        assert!(fresh.is_initiated());
        assert_eq!(fresh.cpu(), Some(1));
        assert!(!regs.writes().is_empty());
    }

    #[test]
    fn test_concurrent_online_shares_one_box() {
        let (ctx, _) = context(Generation::SandyBridgeEp, FixedTopology::uniform(1, 8));
        ctx.cpu_init(&[]).unwrap();

        let barrier = std::sync::Barrier::new(8);
        std::thread::scope(|scope| {
            for cpu in 0..8 {
                let (ctx, barrier) = (&ctx, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    ctx.cpu_online(cpu).unwrap();
                });
            }
        });
        let pcu = ctx.find_box("uncore_pcu", 0).unwrap();
        assert_eq!(pcu.refcnt(), 8);
        assert!(pcu.is_initiated());

        let barrier = std::sync::Barrier::new(7);
        std::thread::scope(|scope| {
            for cpu in 0..7 {
                let (ctx, barrier) = (&ctx, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    ctx.cpu_offline(cpu).unwrap();
                });
            }
        });
        let pcu_after = ctx.find_box("uncore_pcu", 0).unwrap();
        assert!(Arc::ptr_eq(&pcu, &pcu_after));
        assert_eq!(pcu.refcnt(), 1);
        assert!(pcu.is_initiated());
        assert_eq!(ctx.collector(0), Some(7));
        assert_eq!(pcu.cpu(), Some(7));
    }

    #[test]
    fn test_repeated_online_is_ignored() {
        let (ctx, _) = context(Generation::SandyBridgeEp, FixedTopology::uniform(1, 2));
        ctx.init(&[]).unwrap();
        ctx.cpu_online(0).unwrap();
        assert_eq!(ctx.find_box("uncore_ubox", 0).unwrap().refcnt(), 2);
        assert!(ctx.cpu_online(99).is_err());
    }

    #[test]
    fn test_pci_probe_and_remove() {
        let (ctx, regs) = context(Generation::IvyBridgeEp, FixedTopology::uniform(2, 2));
        let mut devices = uboxes(&regs, ivbep::UBOX_DEVICE_ID, &[0x3f, 0x7f]);
        let ha = device(0x7f, 14, 1, 0xe30);
        let filter = device(0x7f, 8, 6, 0xe86);
        // r3qpi box 2 does not exist on this generation
        let r3qpi2 = device(0x3f, 19, 5, 0xe3e);
        devices.extend([ha, filter, r3qpi2]);
        ctx.init(&devices).unwrap();

        let ha_box = ctx.find_box("uncore_ha_0", 1).unwrap();
        assert_eq!(ha_box.target(), BoxTarget::Pci(ha.address));
        assert!(ha_box.is_initiated());
        assert_eq!(ha_box.cpu(), Some(2));
        assert_eq!(
            ctx.extras().get(1, ExtraDevice::QpiPort0Filter),
            Some(filter.address)
        );
        assert!(ctx.boxes().iter().all(|b| b.ty().name != "r3qpi" || b.index() < 2));

        let dup = ctx.pci_probe(&ha);
        assert!(matches!(dup, Err(UncpmuError::PciError(_))));

        assert!(ctx.pci_remove(ha.address));
        assert!(!ha_box.is_initiated());
        assert!(ctx.find_box("uncore_ha_0", 1).is_err());
        assert!(ctx.pci_remove(filter.address));
        assert!(!ctx.pci_remove(filter.address));
    }

    #[test]
    fn test_hswep_sbox_count_from_capid4() {
        for (capid4, expected) in [(0u64, 2usize), (0x3 << 6, hswep::SBOX.num_boxes)] {
            let (ctx, regs) = context(Generation::HaswellEp, FixedTopology::uniform(1, 2));
            let mut devices = uboxes(&regs, hswep::UBOX_DEVICE_ID, &[0xff]);
            let pcu3 = device(0xff, 30, 3, 0x2fc0);
            regs.set(
                RegisterKey::Pci {
                    device: pcu3.address,
                    offset: hswep::pci::PCU3_CAPID4,
                },
                capid4,
            );
            devices.push(pcu3);
            ctx.init(&devices).unwrap();
            let sboxes = ctx.pmus().iter().filter(|p| p.ty().name == "sbox").count();
            assert_eq!(sboxes, expected);
        }
    }

    #[test]
    fn test_skx_cha_count_from_devices() {
        let mut devices: Vec<_> = (0..3).map(|f| device(0x17, 29, f, skx::CHA_DEVICE_ID)).collect();
        devices.push(device(0x85, 29, 0, skx::CHA_DEVICE_ID));
        assert_eq!(count_cha(&devices), 3);
        assert_eq!(count_cha(&[]), 0);

        let (ctx, _) = context(Generation::SkylakeX, FixedTopology::uniform(1, 2));
        ctx.cpu_init(&devices).unwrap();
        let chas = ctx.pmus().iter().filter(|p| p.ty().name == "cha").count();
        assert_eq!(chas, 3);
    }

    #[test]
    fn test_msr_events_end_to_end() {
        let (ctx, regs) = context(Generation::SandyBridgeEp, FixedTopology::uniform(1, 2));
        ctx.init(&[]).unwrap();
        let cbox = ctx.find_box("uncore_cbox_1", 0).unwrap();

        let (attr, _) = resolve_event(cbox.ty(), "event=0x34,umask=0x03,tid_en=1,filter_tid=0x3").unwrap();
        let event = cbox.event_init(1, attr).unwrap();
        cbox.validate_group(std::slice::from_ref(&event)).unwrap();
        let id = cbox.add_event(event, true).unwrap();

        let filter = RegisterKey::Msr {
            cpu: 0,
            msr: snbep::CBOX_FILTER.register(1),
        };
        assert_eq!(regs.get(filter), 0x3);
        assert_eq!(ctx.update_all(), 1);
        assert!(cbox.del_event(id).is_some());
        assert_eq!(cbox.shared_reg_snapshot(0).unwrap().refs, [0; 5]);
    }
}
