//! Typed layouts for the uncore box and event control registers

/// Trait for register layouts that can be converted to/from raw values
///
/// The same layout is used whether the register lives in MSR space or in
/// PCI configuration space; PCI boxes simply truncate to the low 32 bits.
///
/// # Example
///
/// ```ignore
/// use uncpmu_raw::register::{EventControl, RegisterLayout};
///
/// let ctl = EventControl {
///     event_select: 0x34,
///     unit_mask: 0x03,
///     enable: true,
///     ..Default::default()
/// };
/// assert_eq!(ctl.to_msr_value(), 0x40_0334);
/// ```
pub trait RegisterLayout: Sized {
    /// Convert this register layout to a raw register value
    fn to_msr_value(&self) -> u64;

    /// Parse a raw register value into this register layout
    fn from_msr_value(value: u64) -> Self;

    /// Validate that the register values are within acceptable ranges
    ///
    /// Returns `Ok(())` if valid, or an error message if invalid.
    fn validate(&self) -> Result<(), &'static str> {
        Ok(())
    }
}

/// A hardware register with address and typed layout
#[derive(Debug, Clone, Copy)]
pub struct Register<T: RegisterLayout> {
    /// MSR number or PCI config-space offset
    pub address: u64,
    /// Typed register layout
    pub layout: T,
}

impl<T: RegisterLayout> Register<T> {
    pub fn new(address: u64, layout: T) -> Self {
        Self { address, layout }
    }

    pub fn with_address(address: u64) -> Self
    where
        T: Default,
    {
        Self {
            address,
            layout: T::default(),
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        self.layout.validate()
    }

    pub fn to_msr_value(&self) -> u64 {
        self.layout.to_msr_value()
    }

    pub fn from_msr_value(&mut self, value: u64) {
        self.layout = T::from_msr_value(value);
    }
}

/// Raw bit positions shared by every generation
pub mod bits {
    pub const BOX_CTL_RST_CTRL: u64 = 1 << 0;
    pub const BOX_CTL_RST_CTRS: u64 = 1 << 1;
    pub const BOX_CTL_FRZ: u64 = 1 << 8;
    pub const BOX_CTL_FRZ_EN: u64 = 1 << 16;

    pub const CTL_EV_SEL_MASK: u64 = 0x0000_00ff;
    pub const CTL_UMASK_MASK: u64 = 0x0000_ff00;
    pub const CTL_RST: u64 = 1 << 17;
    pub const CTL_EDGE_DET: u64 = 1 << 18;
    pub const CTL_TID_EN: u64 = 1 << 19;
    pub const CTL_EV_SEL_EXT: u64 = 1 << 21;
    pub const CTL_EN: u64 = 1 << 22;
    pub const CTL_INVERT: u64 = 1 << 23;
    pub const CTL_TRESH_MASK: u64 = 0xff00_0000;

    /// Enable bit of the KNL memory/EDC fixed counter control
    pub const KNL_FIXED_CTL_EN: u64 = 0x1;
}

/// Uncore box control register layout
///
/// | Bit | Field          |
/// |-----|----------------|
/// | 0   | reset_control  |
/// | 1   | reset_counters |
/// | 8   | freeze         |
/// | 16  | freeze_enable  |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoxControl {
    pub reset_control: bool,
    pub reset_counters: bool,
    pub freeze: bool,
    pub freeze_enable: bool,
}

impl BoxControl {
    /// Box initialisation value used from Sandy Bridge-EP onwards
    pub const fn snbep_init() -> Self {
        Self {
            reset_control: true,
            reset_counters: true,
            freeze: false,
            freeze_enable: true,
        }
    }

    /// Ivy Bridge-EP style initialisation: no freeze enable
    pub const fn ivbep_init() -> Self {
        Self {
            reset_control: true,
            reset_counters: true,
            freeze: false,
            freeze_enable: false,
        }
    }
}

impl RegisterLayout for BoxControl {
    fn to_msr_value(&self) -> u64 {
        let mut value = 0u64;
        if self.reset_control {
            value |= bits::BOX_CTL_RST_CTRL;
        }
        if self.reset_counters {
            value |= bits::BOX_CTL_RST_CTRS;
        }
        if self.freeze {
            value |= bits::BOX_CTL_FRZ;
        }
        if self.freeze_enable {
            value |= bits::BOX_CTL_FRZ_EN;
        }
        value
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            reset_control: value & bits::BOX_CTL_RST_CTRL != 0,
            reset_counters: value & bits::BOX_CTL_RST_CTRS != 0,
            freeze: value & bits::BOX_CTL_FRZ != 0,
            freeze_enable: value & bits::BOX_CTL_FRZ_EN != 0,
        }
    }
}

/// Per-counter event control register layout
///
/// | Bits  | Field         |
/// |-------|---------------|
/// | 0-7   | event_select  |
/// | 8-15  | unit_mask     |
/// | 17    | reset         |
/// | 18    | edge_detect   |
/// | 19    | tid_enable    |
/// | 21    | event_ext     |
/// | 22    | enable        |
/// | 23    | invert        |
/// | 24-31 | threshold     |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventControl {
    pub event_select: u8,
    pub unit_mask: u8,
    pub reset: bool,
    pub edge_detect: bool,
    pub tid_enable: bool,
    pub event_ext: bool,
    pub enable: bool,
    pub invert: bool,
    pub threshold: u8,
}

impl RegisterLayout for EventControl {
    fn to_msr_value(&self) -> u64 {
        (self.event_select as u64)
            | ((self.unit_mask as u64) << 8)
            | (if self.reset { bits::CTL_RST } else { 0 })
            | (if self.edge_detect { bits::CTL_EDGE_DET } else { 0 })
            | (if self.tid_enable { bits::CTL_TID_EN } else { 0 })
            | (if self.event_ext { bits::CTL_EV_SEL_EXT } else { 0 })
            | (if self.enable { bits::CTL_EN } else { 0 })
            | (if self.invert { bits::CTL_INVERT } else { 0 })
            | ((self.threshold as u64) << 24)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            event_select: (value & bits::CTL_EV_SEL_MASK) as u8,
            unit_mask: ((value & bits::CTL_UMASK_MASK) >> 8) as u8,
            reset: value & bits::CTL_RST != 0,
            edge_detect: value & bits::CTL_EDGE_DET != 0,
            tid_enable: value & bits::CTL_TID_EN != 0,
            event_ext: value & bits::CTL_EV_SEL_EXT != 0,
            enable: value & bits::CTL_EN != 0,
            invert: value & bits::CTL_INVERT != 0,
            threshold: ((value & bits::CTL_TRESH_MASK) >> 24) as u8,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.enable && self.reset {
            return Err("Counter reset and enable must not be set together");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_control_init_values() {
        assert_eq!(BoxControl::snbep_init().to_msr_value(), 0x10003);
        assert_eq!(BoxControl::ivbep_init().to_msr_value(), 0x3);

        let frozen = BoxControl::from_msr_value(0x10103);
        assert!(frozen.freeze);
        assert!(frozen.freeze_enable);
    }

    #[test]
    fn test_event_control_fields() {
        let ctl = EventControl {
            event_select: 0x34,
            unit_mask: 0x03,
            enable: true,
            threshold: 2,
            ..Default::default()
        };
        let value = ctl.to_msr_value();
        assert_eq!(value, 0x0240_0334);

        let decoded = EventControl::from_msr_value(value | bits::CTL_TID_EN);
        assert!(decoded.tid_enable);
        assert_eq!(decoded.threshold, 2);
    }

    #[test]
    fn test_event_control_validation() {
        let mut ctl = EventControl {
            enable: true,
            ..Default::default()
        };
        assert!(ctl.validate().is_ok());

        ctl.reset = true;
        assert!(ctl.validate().is_err());
    }
}
