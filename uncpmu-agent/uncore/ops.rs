//! Hardware hooks of each behaviour family
//!
//! `hw_config` derives an event's filter requirements at init time; the
//! `hw_*` methods program a live box. Errors from the register backend are
//! returned to the caller, which decides whether they matter.

use uncpmu_raw::arch::snbep;
use uncpmu_raw::constraint::extra_reg_fields;
use uncpmu_raw::format::RawConfig;
use uncpmu_raw::register::bits::{
    BOX_CTL_FRZ, CTL_EN, CTL_EV_SEL_MASK, KNL_FIXED_CTL_EN,
};
use uncpmu_raw::register::BoxControl;
use uncpmu_raw::{BoxInit, ExtraDevice, FilterWrite, OpsKind, RegisterLayout, UncoreType};
use uncpmu_raw::UNCORE_FIXED_EVENT;

use crate::error::{Result, UncpmuError};
use crate::uncore::box_state::{BoxTarget, UncoreBox};
use crate::uncore::event::{ExtraRegState, HwEvent, UncoreEvent};

const PCU_BAND_FIRST_EVENT: u64 = 0xb;
const PCU_BAND_LAST_EVENT: u64 = 0xe;
const QPI_PACKET_MATCH_EVENT: u64 = 0x38;

/// Fill in the shared register requirements of a freshly configured event
pub fn hw_config(ty: &UncoreType, box_index: usize, hw: &mut HwEvent, attr: &RawConfig) {
    let ev_sel = hw.config & CTL_EV_SEL_MASK;

    match ty.ops {
        OpsKind::Cbox { filter, .. } => {
            let fields = extra_reg_fields(filter.extra_regs, hw.config);
            if fields != 0 {
                hw.extra_reg = ExtraRegState {
                    idx: Some(fields),
                    reg: filter.register(box_index),
                    config: (attr.config1 & filter.mask(fields)) | filter.always_set,
                    alloc: 0,
                };
            }
        }
        OpsKind::Pcu { filter_reg, .. } => {
            if (PCU_BAND_FIRST_EVENT..=PCU_BAND_LAST_EVENT).contains(&ev_sel) {
                let lane = (ev_sel - PCU_BAND_FIRST_EVENT) as u32;
                hw.extra_reg = ExtraRegState {
                    idx: Some(lane),
                    reg: filter_reg,
                    config: attr.config1 & (0xff << (lane * 8)),
                    alloc: 0,
                };
            }
        }
        OpsKind::Ubox {
            filter_reg,
            filter_mask,
            ..
        } => {
            hw.extra_reg = ExtraRegState {
                idx: Some(0),
                reg: filter_reg,
                config: attr.config1 & filter_mask,
                alloc: 0,
            };
        }
        OpsKind::Qpi { .. } => {
            if ev_sel == QPI_PACKET_MATCH_EVENT {
                hw.extra_reg = ExtraRegState {
                    idx: Some(0),
                    reg: snbep::pci::Q_PY_PKT_MATCH0,
                    config: attr.config1,
                    alloc: 0,
                };
                hw.branch_reg = ExtraRegState {
                    idx: Some(0),
                    reg: snbep::pci::Q_PY_PKT_MASK0,
                    config: attr.config2,
                    alloc: 0,
                };
            }
        }
        OpsKind::Msr { .. } | OpsKind::Pci { .. } | OpsKind::KnlImc => {}
    }
}

fn init_value(init: BoxInit) -> u64 {
    match init {
        BoxInit::Snbep | BoxInit::BitByBit => BoxControl::snbep_init().to_msr_value(),
        BoxInit::Ivbep | BoxInit::IvbepCtlOffs8 => BoxControl::ivbep_init().to_msr_value(),
    }
}

impl UncoreBox {
    fn msr_cpu(&self) -> Result<u32> {
        self.cpu().ok_or_else(|| {
            UncpmuError::HardwareError(format!(
                "{} box {} on package {} has no CPU",
                self.ty().name,
                self.index(),
                self.package()
            ))
        })
    }

    fn write_reg(&self, addr: u32, value: u64) -> Result<()> {
        match self.target() {
            BoxTarget::Msr => self.access().write_msr(self.msr_cpu()?, addr, value),
            BoxTarget::Pci(dev) => self.access().write32(dev, addr, value as u32),
        }
    }

    fn read_reg(&self, addr: u32) -> Result<u64> {
        match self.target() {
            BoxTarget::Msr => self.access().read_msr(self.msr_cpu()?, addr),
            BoxTarget::Pci(dev) => self.access().read32(dev, addr).map(u64::from),
        }
    }

    fn write_filter(&self, reg: u32, value: u64, write: FilterWrite) -> Result<()> {
        match write {
            FilterWrite::Single => self.write_reg(reg, value),
            FilterWrite::Split { high_offset } => {
                self.write_reg(reg, value & 0xffff_ffff)?;
                self.write_reg(reg + high_offset, value >> 32)
            }
        }
    }

    pub(crate) fn hw_init_box(&self) -> Result<()> {
        let init = self.ty().ops.init();
        if init == BoxInit::IvbepCtlOffs8 {
            self.set_ctl_offs8();
        }

        let box_ctl = self.registers().box_ctl();
        if box_ctl == 0 {
            return Ok(());
        }

        let value = init_value(init);
        if init == BoxInit::BitByBit {
            let mut flags = 0u64;
            for bit in (0..64).filter(|b| value & (1u64 << b) != 0) {
                flags |= 1 << bit;
                self.write_reg(box_ctl, flags)?;
            }
            return Ok(());
        }
        self.write_reg(box_ctl, value)
    }

    pub(crate) fn hw_exit_box(&self) -> Result<()> {
        self.hw_disable_box()
    }

    pub(crate) fn hw_disable_box(&self) -> Result<()> {
        let box_ctl = self.registers().box_ctl();
        if box_ctl == 0 {
            return Ok(());
        }
        let config = self.read_reg(box_ctl)?;
        self.write_reg(box_ctl, config | BOX_CTL_FRZ)
    }

    pub(crate) fn hw_enable_box(&self) -> Result<()> {
        let box_ctl = self.registers().box_ctl();
        if box_ctl == 0 {
            return Ok(());
        }
        if matches!(self.ty().ops, OpsKind::KnlImc) {
            return self.write_reg(box_ctl, 0);
        }
        let config = self.read_reg(box_ctl)?;
        self.write_reg(box_ctl, config & !BOX_CTL_FRZ)
    }

    pub(crate) fn hw_enable_event(&self, event: &UncoreEvent) -> Result<()> {
        let hw = &event.hw;

        match self.ty().ops {
            OpsKind::KnlImc => {
                let enable = if event.attr.config & CTL_EV_SEL_MASK == UNCORE_FIXED_EVENT {
                    KNL_FIXED_CTL_EN
                } else {
                    CTL_EN
                };
                return self.write_reg(hw.config_base, hw.config | enable);
            }
            OpsKind::Cbox { filter, .. } if !hw.extra_reg.is_none() => {
                let value = self.shared_reg_config(0);
                self.write_filter(hw.extra_reg.reg, value, filter.write)?;
            }
            OpsKind::Pcu { .. } | OpsKind::Ubox { .. } if !hw.extra_reg.is_none() => {
                let value = self.shared_reg_config(0);
                self.write_filter(hw.extra_reg.reg, value, FilterWrite::Single)?;
            }
            OpsKind::Qpi { .. } if !hw.extra_reg.is_none() => {
                let filter_dev = ExtraDevice::qpi_filter(self.index())
                    .and_then(|dev| self.extras().get(self.package(), dev));
                if let Some(dev) = filter_dev {
                    let access = self.access();
                    let (reg1, reg2) = (&hw.extra_reg, &hw.branch_reg);
                    access.write32(dev, reg1.reg, reg1.config as u32)?;
                    access.write32(dev, reg1.reg + 4, (reg1.config >> 32) as u32)?;
                    access.write32(dev, reg2.reg, reg2.config as u32)?;
                    access.write32(dev, reg2.reg + 4, (reg2.config >> 32) as u32)?;
                } else {
                    tracing::debug!(
                        "No packet filter device for qpi port {} on package {}",
                        self.index(),
                        self.package()
                    );
                }
            }
            _ => {}
        }

        self.write_reg(hw.config_base, hw.config | CTL_EN)
    }

    pub(crate) fn hw_disable_event(&self, hw: &HwEvent) -> Result<()> {
        self.write_reg(hw.config_base, hw.config)
    }

    /// Raw counter value; PCI counters are read as two 32-bit halves
    pub(crate) fn hw_read_counter(&self, hw: &HwEvent) -> Result<u64> {
        match self.target() {
            BoxTarget::Msr => self.access().read_msr(self.msr_cpu()?, hw.event_base),
            BoxTarget::Pci(dev) => {
                let low = self.access().read32(dev, hw.event_base)?;
                let high = self.access().read32(dev, hw.event_base + 4)?;
                Ok(u64::from(high) << 32 | u64::from(low))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uncpmu_raw::arch::{hswep, ivbep, knl, snbep};

    fn configured(ty: &UncoreType, box_index: usize, attr: RawConfig) -> HwEvent {
        let mut hw = HwEvent {
            config: attr.config & ty.raw_event_mask(),
            ..HwEvent::default()
        };
        hw_config(ty, box_index, &mut hw, &attr);
        hw
    }

    #[test]
    fn test_cbox_hw_config_filter_register() {
        // TID filtered occupancy event on box 2
        let attr = RawConfig {
            config: 0x0134 | (1 << 19),
            config1: 0x1f | (0x7 << 18),
            config2: 0,
        };
        let hw = configured(&snbep::CBOX, 2, attr);
        assert_eq!(hw.extra_reg.reg, snbep::msr::C0_PMON_BOX_FILTER + 2 * 0x20);
        let fields = hw.extra_reg.idx.unwrap();
        assert_ne!(fields & 0x1, 0);
        assert_eq!(hw.extra_reg.config & !snbep::CBOX_FILTER.mask(fields), 0);
    }

    #[test]
    fn test_cbox_without_filter_match() {
        let attr = RawConfig {
            config: 0x0011,
            config1: !0,
            config2: 0,
        };
        let hw = configured(&ivbep::CBOX, 0, attr);
        assert!(hw.extra_reg.is_none());
    }

    #[test]
    fn test_knl_cha_always_set_bits() {
        let attr = RawConfig {
            config: 0x0134 | (1 << 19),
            config1: 0,
            config2: 0,
        };
        let hw = configured(&knl::CHA, 1, attr);
        assert_eq!(hw.extra_reg.config & knl::CHA_FILTER_ALWAYS_SET, knl::CHA_FILTER_ALWAYS_SET);
    }

    #[test]
    fn test_pcu_band_lanes() {
        for (ev, lane) in [(0xbu64, 0u32), (0xc, 1), (0xd, 2), (0xe, 3)] {
            let attr = RawConfig {
                config: ev,
                config1: 0x4433_2211,
                config2: 0,
            };
            for ty in [&snbep::PCU, &hswep::PCU] {
                let hw = configured(ty, 0, attr);
                assert_eq!(hw.extra_reg.idx, Some(lane));
                assert_eq!(hw.extra_reg.config, 0x4433_2211 & (0xff << (lane * 8)));
            }
        }
        let plain = configured(
            &snbep::PCU,
            0,
            RawConfig {
                config: 0x0a,
                config1: 0xff,
                config2: 0,
            },
        );
        assert!(plain.extra_reg.is_none());
    }

    #[test]
    fn test_hswep_ubox_filter() {
        let attr = RawConfig {
            config: 0x42,
            config1: 0xfff,
            config2: 0,
        };
        let hw = configured(&hswep::UBOX, 0, attr);
        assert_eq!(hw.extra_reg.idx, Some(0));
        assert_eq!(hw.extra_reg.reg, hswep::msr::U_PMON_BOX_FILTER);
        assert_eq!(hw.extra_reg.config, 0x3f);
    }

    #[test]
    fn test_qpi_packet_match() {
        let attr = RawConfig {
            config: 0x38 | (1 << 21),
            config1: 0x1234,
            config2: 0xffff,
        };
        let hw = configured(&snbep::QPI, 1, attr);
        assert_eq!(hw.extra_reg.reg, snbep::pci::Q_PY_PKT_MATCH0);
        assert_eq!(hw.branch_reg.reg, snbep::pci::Q_PY_PKT_MASK0);
        assert_eq!(hw.extra_reg.config, 0x1234);
        assert_eq!(hw.branch_reg.config, 0xffff);

        let other = configured(
            &snbep::QPI,
            1,
            RawConfig {
                config: 0x14,
                ..attr
            },
        );
        assert!(other.extra_reg.is_none());
    }

    #[test]
    fn test_init_values() {
        assert_eq!(init_value(BoxInit::Snbep), 0x10003);
        assert_eq!(init_value(BoxInit::BitByBit), 0x10003);
        assert_eq!(init_value(BoxInit::Ivbep), 0x3);
        assert_eq!(init_value(BoxInit::IvbepCtlOffs8), 0x3);
    }
}
