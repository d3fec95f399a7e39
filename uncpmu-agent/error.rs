use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UncpmuError {
    #[error("MSR operation failed: {0}")]
    MsrError(String),

    #[error("PCI operation failed: {0}")]
    PciError(String),

    #[error("Affinity operation failed: {0}")]
    AffinityError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Nix error: {0}")]
    NixError(#[from] nix::Error),

    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Format error: {0}")]
    FormatError(#[from] uncpmu_raw::FormatError),

    #[error("Invalid hardware state: {0}")]
    HardwareError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("No counter assignment possible: {0}")]
    Conflict(String),

    #[error("Too many events on {0}")]
    TooManyEvents(String),
}

pub type Result<T> = std::result::Result<T, UncpmuError>;
