use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, UncpmuError};

/// Overflow poll period used when nothing else is configured
pub const UNCORE_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// What to do once a shared-register sub-field reference count is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefLimitPolicy {
    /// Refuse the claim like a conflict
    #[default]
    Enforce,
    /// Keep counting past the field width
    Unbounded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub poll_interval_secs: u64,
    pub ref_limit: RefLimitPolicy,
    /// Packages to program; empty means all
    pub packages: Vec<u32>,
    /// Events `monitor` programs on every selected package
    pub events: Vec<EventSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    /// PMU name such as `uncore_cbox_0` or `uncore_pcu`
    pub pmu: String,
    /// Named alias (`cas_count_read`) or term list (`event=0x34,umask=0x03`)
    pub event: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: UNCORE_POLL_INTERVAL.as_secs(),
            ref_limit: RefLimitPolicy::Enforce,
            packages: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            UncpmuError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(UncpmuError::ConfigError(
                "poll_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn wants_package(&self, package: u32) -> bool {
        self.packages.is_empty() || self.packages.contains(&package)
    }
}

/// Parse a CPU list like "0-3,8-11"
pub fn parse_cpu_list(s: &str) -> Option<Vec<u32>> {
    let mut cpus = Vec::new();
    for part in s.trim().split(',').filter(|p| !p.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.parse().ok()?;
            let end: u32 = end.parse().ok()?;
            cpus.extend(start..=end);
        } else {
            cpus.push(part.parse().ok()?);
        }
    }
    Some(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3,8-9\n"), Some(vec![0, 1, 2, 3, 8, 9]));
        assert_eq!(parse_cpu_list("5"), Some(vec![5]));
        assert_eq!(parse_cpu_list("0-x"), None);
    }

    #[test]
    fn test_config_defaults_and_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"ref_limit": "unbounded", "packages": [1]}"#).unwrap();
        assert_eq!(config.poll_interval(), UNCORE_POLL_INTERVAL);
        assert_eq!(config.ref_limit, RefLimitPolicy::Unbounded);
        assert!(config.wants_package(1));
        assert!(!config.wants_package(0));
        assert!(EngineConfig::default().wants_package(7));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = EngineConfig {
            poll_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(UncpmuError::ConfigError(_))));
    }
}
