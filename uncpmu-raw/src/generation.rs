//! Processor generation selection and PCI device tables

use crate::arch::{bdx, hswep, ivbep, knl, skx, snbep};
use crate::types::UncoreType;

/// Uncore-bearing Xeon generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    SandyBridgeEp,
    IvyBridgeEp,
    KnightsLanding,
    HaswellEp,
    BroadwellX,
    SkylakeX,
}

/// Companion PCI devices that carry no counters of their own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtraDevice {
    /// Packet match/mask registers of QPI port 0
    QpiPort0Filter,
    QpiPort1Filter,
    QpiPort2Filter,
    /// PCU function 3, holding the capability registers
    Pcu3,
}

impl ExtraDevice {
    /// Slot of this device in a package's extra-device table
    pub fn index(&self) -> usize {
        match self {
            ExtraDevice::QpiPort0Filter => 0,
            ExtraDevice::QpiPort1Filter => 1,
            ExtraDevice::QpiPort2Filter => 2,
            ExtraDevice::Pcu3 => 3,
        }
    }

    /// Filter device of the given QPI port, if that port has one
    pub fn qpi_filter(port: usize) -> Option<Self> {
        match port {
            0 => Some(ExtraDevice::QpiPort0Filter),
            1 => Some(ExtraDevice::QpiPort1Filter),
            2 => Some(ExtraDevice::QpiPort2Filter),
            _ => None,
        }
    }

    pub const COUNT: usize = 4;
}

/// What a matched PCI function is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PciUnitKind {
    /// Box `box_index` of entry `type_index` in the PCI type list
    Box { type_index: usize, box_index: usize },
    Extra(ExtraDevice),
}

/// One entry of a generation's PCI id table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciUnit {
    pub device_id: u16,
    /// Required (device, function) when the id alone is ambiguous
    pub devfn: Option<(u8, u8)>,
    pub kind: PciUnitKind,
}

impl PciUnit {
    pub const fn new(device_id: u16, type_index: usize, box_index: usize) -> Self {
        Self {
            device_id,
            devfn: None,
            kind: PciUnitKind::Box {
                type_index,
                box_index,
            },
        }
    }

    pub const fn at(
        device_id: u16,
        devfn: (u8, u8),
        type_index: usize,
        box_index: usize,
    ) -> Self {
        Self {
            device_id,
            devfn: Some(devfn),
            kind: PciUnitKind::Box {
                type_index,
                box_index,
            },
        }
    }

    pub const fn extra(device_id: u16, device: ExtraDevice) -> Self {
        Self {
            device_id,
            devfn: None,
            kind: PciUnitKind::Extra(device),
        }
    }

    pub fn matches(&self, device_id: u16, device: u8, function: u8) -> bool {
        self.device_id == device_id
            && self
                .devfn
                .map_or(true, |(dev, func)| dev == device && func == function)
    }
}

/// How PCI buses are mapped onto physical packages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pci2PhyParams {
    /// Read the local node id and the node-id map from every ubox device,
    /// then propagate each segment's known entries across unmapped buses
    NodeIdScan {
        ubox_device: u16,
        nodeid_reg: u32,
        idmap_reg: u32,
        /// Walk buses from 255 down to 0 when filling gaps
        reverse: bool,
    },
    /// Single package: the buses of these devices belong to package 0
    SingleSocket { devices: &'static [u16] },
}

impl Generation {
    /// Map a family 6 CPU model number to its uncore generation
    pub fn from_cpu_model(model: u8) -> Option<Self> {
        match model {
            0x2d => Some(Generation::SandyBridgeEp),
            0x3e => Some(Generation::IvyBridgeEp),
            0x3f => Some(Generation::HaswellEp),
            0x4f | 0x56 => Some(Generation::BroadwellX),
            0x57 | 0x85 => Some(Generation::KnightsLanding),
            0x55 => Some(Generation::SkylakeX),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Generation::SandyBridgeEp => "snbep",
            Generation::IvyBridgeEp => "ivbep",
            Generation::KnightsLanding => "knl",
            Generation::HaswellEp => "hswep",
            Generation::BroadwellX => "bdx",
            Generation::SkylakeX => "skx",
        }
    }

    pub fn all() -> &'static [Generation] {
        &[
            Generation::SandyBridgeEp,
            Generation::IvyBridgeEp,
            Generation::KnightsLanding,
            Generation::HaswellEp,
            Generation::BroadwellX,
            Generation::SkylakeX,
        ]
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|g| g.name() == name)
    }

    pub fn msr_uncores(&self) -> &'static [&'static UncoreType] {
        match self {
            Generation::SandyBridgeEp => &snbep::MSR_UNCORES,
            Generation::IvyBridgeEp => &ivbep::MSR_UNCORES,
            Generation::KnightsLanding => &knl::MSR_UNCORES,
            Generation::HaswellEp => &hswep::MSR_UNCORES,
            Generation::BroadwellX => &bdx::MSR_UNCORES,
            Generation::SkylakeX => &skx::MSR_UNCORES,
        }
    }

    pub fn pci_uncores(&self) -> &'static [&'static UncoreType] {
        match self {
            Generation::SandyBridgeEp => &snbep::PCI_UNCORES,
            Generation::IvyBridgeEp => &ivbep::PCI_UNCORES,
            Generation::KnightsLanding => &knl::PCI_UNCORES,
            Generation::HaswellEp => &hswep::PCI_UNCORES,
            Generation::BroadwellX => &bdx::PCI_UNCORES,
            Generation::SkylakeX => &skx::PCI_UNCORES,
        }
    }

    pub fn pci_units(&self) -> &'static [PciUnit] {
        match self {
            Generation::SandyBridgeEp => &snbep::PCI_UNITS,
            Generation::IvyBridgeEp => &ivbep::PCI_UNITS,
            Generation::KnightsLanding => &knl::PCI_UNITS,
            Generation::HaswellEp => &hswep::PCI_UNITS,
            Generation::BroadwellX => &bdx::PCI_UNITS,
            Generation::SkylakeX => &skx::PCI_UNITS,
        }
    }

    /// First table entry matching a discovered PCI function
    pub fn match_pci_unit(&self, device_id: u16, device: u8, function: u8) -> Option<&'static PciUnit> {
        self.pci_units()
            .iter()
            .find(|u| u.matches(device_id, device, function))
    }

    pub fn pci2phy(&self) -> Pci2PhyParams {
        let scan = |ubox_device, nodeid_reg, idmap_reg, reverse| Pci2PhyParams::NodeIdScan {
            ubox_device,
            nodeid_reg,
            idmap_reg,
            reverse,
        };
        match self {
            Generation::SandyBridgeEp => {
                scan(snbep::UBOX_DEVICE_ID, snbep::pci::CPUNODEID, snbep::pci::GIDNIDMAP, true)
            }
            Generation::IvyBridgeEp => {
                scan(ivbep::UBOX_DEVICE_ID, snbep::pci::CPUNODEID, snbep::pci::GIDNIDMAP, true)
            }
            Generation::HaswellEp => {
                scan(hswep::UBOX_DEVICE_ID, snbep::pci::CPUNODEID, snbep::pci::GIDNIDMAP, true)
            }
            Generation::BroadwellX => {
                scan(bdx::UBOX_DEVICE_ID, snbep::pci::CPUNODEID, snbep::pci::GIDNIDMAP, true)
            }
            Generation::SkylakeX => {
                scan(skx::UBOX_DEVICE_ID, skx::pci::CPUNODEID, skx::pci::GIDNIDMAP, false)
            }
            Generation::KnightsLanding => Pci2PhyParams::SingleSocket {
                devices: &knl::SINGLE_SOCKET_DEVICES,
            },
        }
    }

    /// Cbox type whose box count is clamped to the cores per package
    pub fn cbox_clamped(&self) -> Option<&'static UncoreType> {
        match self {
            Generation::SandyBridgeEp => Some(&snbep::CBOX),
            Generation::IvyBridgeEp => Some(&ivbep::CBOX),
            Generation::HaswellEp => Some(&hswep::CBOX),
            Generation::BroadwellX => Some(&bdx::CBOX),
            Generation::KnightsLanding | Generation::SkylakeX => None,
        }
    }

    /// SBOX type whose count depends on the PCU3 CAPID4 register
    pub fn sbox_capid_probe(&self) -> Option<&'static UncoreType> {
        match self {
            Generation::HaswellEp => Some(&hswep::SBOX),
            _ => None,
        }
    }

    /// CHA type whose count comes from the PCI topology
    pub fn cha_from_topology(&self) -> Option<&'static UncoreType> {
        match self {
            Generation::SkylakeX => Some(&skx::CHA),
            _ => None,
        }
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Access, MAX_GENERIC_COUNTERS};

    #[test]
    fn test_from_cpu_model() {
        assert_eq!(Generation::from_cpu_model(0x2d), Some(Generation::SandyBridgeEp));
        assert_eq!(Generation::from_cpu_model(0x56), Some(Generation::BroadwellX));
        assert_eq!(Generation::from_cpu_model(0x85), Some(Generation::KnightsLanding));
        assert_eq!(Generation::from_cpu_model(0x55), Some(Generation::SkylakeX));
        assert_eq!(Generation::from_cpu_model(0x4e), None);
        assert_eq!(Generation::from_name("hswep"), Some(Generation::HaswellEp));
    }

    #[test]
    fn test_type_lists_are_consistent() {
        for generation in Generation::all() {
            for ty in generation.msr_uncores() {
                assert_eq!(ty.access, Access::Msr, "{}/{}", generation, ty.name);
                assert!(ty.num_counters <= MAX_GENERIC_COUNTERS);
            }
            for ty in generation.pci_uncores() {
                assert_eq!(ty.access, Access::Pci, "{}/{}", generation, ty.name);
            }
            for unit in generation.pci_units() {
                if let PciUnitKind::Box { type_index, .. } = unit.kind {
                    assert!(type_index < generation.pci_uncores().len());
                }
            }
        }
    }

    #[test]
    fn test_devfn_disambiguates_shared_ids() {
        let skx = Generation::SkylakeX;
        let unit = skx.match_pci_unit(0x2042, 12, 2).unwrap();
        assert_eq!(
            unit.kind,
            PciUnitKind::Box {
                type_index: 0,
                box_index: 3
            }
        );
        assert!(skx.match_pci_unit(0x2042, 12, 3).is_none());

        let hsw = Generation::HaswellEp;
        let pcu3 = hsw.match_pci_unit(0x2fc0, 30, 3).unwrap();
        assert_eq!(pcu3.kind, PciUnitKind::Extra(ExtraDevice::Pcu3));
    }

    #[test]
    fn test_pci2phy_params() {
        assert_eq!(
            Generation::SkylakeX.pci2phy(),
            Pci2PhyParams::NodeIdScan {
                ubox_device: 0x2014,
                nodeid_reg: 0xc0,
                idmap_reg: 0xd4,
                reverse: false
            }
        );
        assert!(matches!(
            Generation::KnightsLanding.pci2phy(),
            Pci2PhyParams::SingleSocket { devices } if devices.contains(&0x7817)
        ));
    }

    #[test]
    fn test_qpi_filter_ports() {
        assert_eq!(ExtraDevice::qpi_filter(2), Some(ExtraDevice::QpiPort2Filter));
        assert_eq!(ExtraDevice::qpi_filter(3), None);
        assert!(ExtraDevice::Pcu3.index() < ExtraDevice::COUNT);
    }
}
