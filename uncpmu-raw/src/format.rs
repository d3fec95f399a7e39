//! Format attributes and named event aliases
//!
//! A format attribute names a bit field of one of the three raw config
//! words, using the `config1:17-22` notation. Multi-range specs such as
//! `config:0-7,21` scatter the value LSB-first across the listed ranges.

use std::ops::RangeInclusive;

pub type Result<T> = std::result::Result<T, FormatError>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("Invalid format spec '{0}'")]
    InvalidSpec(String),

    #[error("Unknown format term '{0}'")]
    UnknownTerm(String),

    #[error("Invalid value '{value}' for term '{term}'")]
    InvalidValue { term: String, value: String },

    #[error("Value 0x{value:x} does not fit term '{term}'")]
    ValueTooWide { term: String, value: u64 },
}

/// Raw config word a format field lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWord {
    Config,
    Config1,
    Config2,
}

/// Named bit field of the raw event encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatAttr {
    pub name: &'static str,
    pub spec: &'static str,
}

impl FormatAttr {
    pub const fn new(name: &'static str, spec: &'static str) -> Self {
        Self { name, spec }
    }

    /// Split the spec into its target word and bit ranges
    pub fn parse(&self) -> Result<(ConfigWord, Vec<RangeInclusive<u32>>)> {
        let invalid = || FormatError::InvalidSpec(self.spec.to_string());

        let (word, ranges) = self.spec.split_once(':').ok_or_else(invalid)?;
        let word = match word {
            "config" => ConfigWord::Config,
            "config1" => ConfigWord::Config1,
            "config2" => ConfigWord::Config2,
            _ => return Err(invalid()),
        };

        let mut parsed = Vec::new();
        for part in ranges.split(',') {
            let range = match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: u32 = lo.parse().map_err(|_| invalid())?;
                    let hi: u32 = hi.parse().map_err(|_| invalid())?;
                    lo..=hi
                }
                None => {
                    let bit: u32 = part.parse().map_err(|_| invalid())?;
                    bit..=bit
                }
            };
            if range.start() > range.end() || *range.end() > 63 {
                return Err(invalid());
            }
            parsed.push(range);
        }

        Ok((word, parsed))
    }

    /// Total number of value bits this field holds
    pub fn width(&self) -> Result<u32> {
        let (_, ranges) = self.parse()?;
        Ok(ranges.iter().map(|r| r.end() - r.start() + 1).sum())
    }

    /// Place `value` into the field, returning the target word and bits
    pub fn encode(&self, value: u64) -> Result<(ConfigWord, u64)> {
        let (word, ranges) = self.parse()?;

        let mut remaining = value;
        let mut bits = 0u64;
        for range in &ranges {
            let width = range.end() - range.start() + 1;
            let mask = if width == 64 { !0 } else { (1u64 << width) - 1 };
            bits |= (remaining & mask) << range.start();
            remaining = if width == 64 { 0 } else { remaining >> width };
        }

        if remaining != 0 {
            return Err(FormatError::ValueTooWide {
                term: self.name.to_string(),
                value,
            });
        }
        Ok((word, bits))
    }
}

/// Raw event encoding split over the three config words
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawConfig {
    pub config: u64,
    pub config1: u64,
    pub config2: u64,
}

impl RawConfig {
    fn word_mut(&mut self, word: ConfigWord) -> &mut u64 {
        match word {
            ConfigWord::Config => &mut self.config,
            ConfigWord::Config1 => &mut self.config1,
            ConfigWord::Config2 => &mut self.config2,
        }
    }
}

fn parse_value(term: &str, value: &str) -> Result<u64> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    };
    parsed.map_err(|_| FormatError::InvalidValue {
        term: term.to_string(),
        value: value.to_string(),
    })
}

/// Encode a term list such as `event=0x34,umask=0x03,edge` against a set of
/// format attributes. A bare term sets its field to 1.
pub fn encode_terms(formats: &[FormatAttr], terms: &str) -> Result<RawConfig> {
    let mut raw = RawConfig::default();

    for term in terms.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (name, value) = match term.split_once('=') {
            Some((name, value)) => (name.trim(), parse_value(name, value.trim())?),
            None => (term, 1),
        };

        let attr = formats
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| FormatError::UnknownTerm(name.to_string()))?;

        let (word, bits) = attr.encode(value)?;
        *raw.word_mut(word) |= bits;
    }

    Ok(raw)
}

/// Named event alias exposed alongside the raw format
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventDesc {
    pub name: &'static str,
    pub config: &'static str,
    pub scale: Option<&'static str>,
    pub unit: Option<&'static str>,
}

impl EventDesc {
    pub const fn new(name: &'static str, config: &'static str) -> Self {
        Self {
            name,
            config,
            scale: None,
            unit: None,
        }
    }

    pub const fn scaled(
        name: &'static str,
        config: &'static str,
        scale: &'static str,
        unit: &'static str,
    ) -> Self {
        Self {
            name,
            config,
            scale: Some(scale),
            unit: Some(unit),
        }
    }

    /// Scale factor applied to the raw count, 1.0 when none is declared
    pub fn scale_factor(&self) -> f64 {
        self.scale.and_then(|s| s.parse().ok()).unwrap_or(1.0)
    }
}

/// Format attributes shared by every generation
pub mod attrs {
    use super::FormatAttr;

    pub const EVENT: FormatAttr = FormatAttr::new("event", "config:0-7");
    pub const EVENT2: FormatAttr = FormatAttr::new("event", "config:0-6");
    pub const EVENT_EXT: FormatAttr = FormatAttr::new("event", "config:0-7,21");
    pub const USE_OCC_CTR: FormatAttr = FormatAttr::new("use_occ_ctr", "config:7");
    pub const UMASK: FormatAttr = FormatAttr::new("umask", "config:8-15");
    pub const UMASK_EXT: FormatAttr = FormatAttr::new("umask", "config:8-15,32-39");
    pub const QOR: FormatAttr = FormatAttr::new("qor", "config:16");
    pub const EDGE: FormatAttr = FormatAttr::new("edge", "config:18");
    pub const TID_EN: FormatAttr = FormatAttr::new("tid_en", "config:19");
    pub const INV: FormatAttr = FormatAttr::new("inv", "config:23");
    pub const THRESH9: FormatAttr = FormatAttr::new("thresh", "config:24-35");
    pub const THRESH8: FormatAttr = FormatAttr::new("thresh", "config:24-31");
    pub const THRESH6: FormatAttr = FormatAttr::new("thresh", "config:24-29");
    pub const THRESH5: FormatAttr = FormatAttr::new("thresh", "config:24-28");
    pub const OCC_SEL: FormatAttr = FormatAttr::new("occ_sel", "config:14-15");
    pub const OCC_INVERT: FormatAttr = FormatAttr::new("occ_invert", "config:30");
    pub const OCC_EDGE: FormatAttr = FormatAttr::new("occ_edge", "config:14-51");
    pub const OCC_EDGE_DET: FormatAttr = FormatAttr::new("occ_edge_det", "config:31");
    pub const CH_MASK: FormatAttr = FormatAttr::new("ch_mask", "config:36-43");
    pub const FC_MASK: FormatAttr = FormatAttr::new("fc_mask", "config:44-46");
    pub const FILTER_TID: FormatAttr = FormatAttr::new("filter_tid", "config1:0-4");
    pub const FILTER_TID2: FormatAttr = FormatAttr::new("filter_tid", "config1:0");
    pub const FILTER_TID3: FormatAttr = FormatAttr::new("filter_tid", "config1:0-5");
    pub const FILTER_TID4: FormatAttr = FormatAttr::new("filter_tid", "config1:0-8");
    pub const FILTER_CID: FormatAttr = FormatAttr::new("filter_cid", "config1:5");
    pub const FILTER_LINK: FormatAttr = FormatAttr::new("filter_link", "config1:5-8");
    pub const FILTER_LINK2: FormatAttr = FormatAttr::new("filter_link", "config1:6-8");
    pub const FILTER_LINK3: FormatAttr = FormatAttr::new("filter_link", "config1:12");
    pub const FILTER_LINK4: FormatAttr = FormatAttr::new("filter_link", "config1:9-12");
    pub const FILTER_NID: FormatAttr = FormatAttr::new("filter_nid", "config1:10-17");
    pub const FILTER_NID2: FormatAttr = FormatAttr::new("filter_nid", "config1:32-47");
    pub const FILTER_STATE: FormatAttr = FormatAttr::new("filter_state", "config1:18-22");
    pub const FILTER_STATE2: FormatAttr = FormatAttr::new("filter_state", "config1:17-22");
    pub const FILTER_STATE3: FormatAttr = FormatAttr::new("filter_state", "config1:17-23");
    pub const FILTER_STATE4: FormatAttr = FormatAttr::new("filter_state", "config1:18-20");
    pub const FILTER_STATE5: FormatAttr = FormatAttr::new("filter_state", "config1:17-26");
    pub const FILTER_REM: FormatAttr = FormatAttr::new("filter_rem", "config1:32");
    pub const FILTER_LOC: FormatAttr = FormatAttr::new("filter_loc", "config1:33");
    pub const FILTER_NM: FormatAttr = FormatAttr::new("filter_nm", "config1:36");
    pub const FILTER_NOT_NM: FormatAttr = FormatAttr::new("filter_not_nm", "config1:37");
    pub const FILTER_LOCAL: FormatAttr = FormatAttr::new("filter_local", "config1:33");
    pub const FILTER_ALL_OP: FormatAttr = FormatAttr::new("filter_all_op", "config1:35");
    pub const FILTER_NNM: FormatAttr = FormatAttr::new("filter_nnm", "config1:37");
    pub const FILTER_OPC: FormatAttr = FormatAttr::new("filter_opc", "config1:23-31");
    pub const FILTER_OPC2: FormatAttr = FormatAttr::new("filter_opc", "config1:52-60");
    pub const FILTER_OPC3: FormatAttr = FormatAttr::new("filter_opc", "config1:41-60");
    pub const FILTER_OPC_0: FormatAttr = FormatAttr::new("filter_opc0", "config1:41-50");
    pub const FILTER_OPC_1: FormatAttr = FormatAttr::new("filter_opc1", "config1:51-60");
    pub const FILTER_NC: FormatAttr = FormatAttr::new("filter_nc", "config1:62");
    pub const FILTER_C6: FormatAttr = FormatAttr::new("filter_c6", "config1:61");
    pub const FILTER_ISOC: FormatAttr = FormatAttr::new("filter_isoc", "config1:63");
    pub const FILTER_BAND0: FormatAttr = FormatAttr::new("filter_band0", "config1:0-7");
    pub const FILTER_BAND1: FormatAttr = FormatAttr::new("filter_band1", "config1:8-15");
    pub const FILTER_BAND2: FormatAttr = FormatAttr::new("filter_band2", "config1:16-23");
    pub const FILTER_BAND3: FormatAttr = FormatAttr::new("filter_band3", "config1:24-31");
    pub const MATCH_RDS: FormatAttr = FormatAttr::new("match_rds", "config1:48-51");
    pub const MATCH_RNID30: FormatAttr = FormatAttr::new("match_rnid30", "config1:32-35");
    pub const MATCH_RNID4: FormatAttr = FormatAttr::new("match_rnid4", "config1:31");
    pub const MATCH_DNID: FormatAttr = FormatAttr::new("match_dnid", "config1:13-17");
    pub const MATCH_MC: FormatAttr = FormatAttr::new("match_mc", "config1:9-12");
    pub const MATCH_OPC: FormatAttr = FormatAttr::new("match_opc", "config1:5-8");
    pub const MATCH_VNW: FormatAttr = FormatAttr::new("match_vnw", "config1:3-4");
    pub const MATCH0: FormatAttr = FormatAttr::new("match0", "config1:0-31");
    pub const MATCH1: FormatAttr = FormatAttr::new("match1", "config1:32-63");
    pub const MASK_RDS: FormatAttr = FormatAttr::new("mask_rds", "config2:48-51");
    pub const MASK_RNID30: FormatAttr = FormatAttr::new("mask_rnid30", "config2:32-35");
    pub const MASK_RNID4: FormatAttr = FormatAttr::new("mask_rnid4", "config2:31");
    pub const MASK_DNID: FormatAttr = FormatAttr::new("mask_dnid", "config2:13-17");
    pub const MASK_MC: FormatAttr = FormatAttr::new("mask_mc", "config2:9-12");
    pub const MASK_OPC: FormatAttr = FormatAttr::new("mask_opc", "config2:5-8");
    pub const MASK_VNW: FormatAttr = FormatAttr::new("mask_vnw", "config2:3-4");
    pub const MASK0: FormatAttr = FormatAttr::new("mask0", "config2:0-31");
    pub const MASK1: FormatAttr = FormatAttr::new("mask1", "config2:32-63");

    /// Packet match/mask fields of the QPI boxes
    pub const QPI_MATCH_MASK: [FormatAttr; 18] = [
        MATCH_RDS, MATCH_RNID30, MATCH_RNID4, MATCH_DNID, MATCH_MC, MATCH_OPC, MATCH_VNW,
        MATCH0, MATCH1, MASK_RDS, MASK_RNID30, MASK_RNID4, MASK_DNID, MASK_MC, MASK_OPC,
        MASK_VNW, MASK0, MASK1,
    ];
}

#[cfg(test)]
mod tests {
    use super::attrs::*;
    use super::*;

    #[test]
    fn test_parse_multi_range_spec() {
        let (word, ranges) = EVENT_EXT.parse().unwrap();
        assert_eq!(word, ConfigWord::Config);
        assert_eq!(ranges, vec![0..=7, 21..=21]);
        assert_eq!(EVENT_EXT.width().unwrap(), 9);
    }

    #[test]
    fn test_encode_scatters_value() {
        // bit 8 of the value lands in bit 21 of config
        assert_eq!(EVENT_EXT.encode(0x102).unwrap(), (ConfigWord::Config, 0x20_0002));
        assert_eq!(UMASK_EXT.encode(0x1ff).unwrap(), (ConfigWord::Config, 0x1_0000_ff00));
        assert!(matches!(
            THRESH5.encode(0x20),
            Err(FormatError::ValueTooWide { .. })
        ));
    }

    #[test]
    fn test_encode_terms() {
        let formats = [EVENT, UMASK, EDGE, FILTER_TID, FILTER_BAND1, MASK0];
        let raw = encode_terms(&formats, "event=0x34,umask=3,edge,filter_tid=0x1f").unwrap();
        assert_eq!(raw.config, 0x4_0334);
        assert_eq!(raw.config1, 0x1f);

        let raw = encode_terms(&formats, "filter_band1=0x7f, mask0=0xffffffff").unwrap();
        assert_eq!(raw.config1, 0x7f00);
        assert_eq!(raw.config2, 0xffff_ffff);

        assert_eq!(
            encode_terms(&formats, "bogus=1"),
            Err(FormatError::UnknownTerm("bogus".to_string()))
        );
        assert!(matches!(
            encode_terms(&formats, "event=zz"),
            Err(FormatError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_invalid_spec() {
        let bad = FormatAttr::new("bad", "config3:0-7");
        assert!(bad.parse().is_err());
        let reversed = FormatAttr::new("bad", "config:7-0");
        assert!(reversed.parse().is_err());
    }

    #[test]
    fn test_event_desc_scale() {
        let desc = EventDesc::scaled(
            "cas_count_read",
            "event=0x04,umask=0x03",
            "6.103515625e-5",
            "MiB",
        );
        assert!((desc.scale_factor() - 6.103515625e-5).abs() < f64::EPSILON);
        assert_eq!(EventDesc::new("clockticks", "event=0xff").scale_factor(), 1.0);
    }
}
