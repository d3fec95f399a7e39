// Macros (must be first for visibility)
#[macro_use]
pub mod macros;

pub mod common;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod prom;
pub mod uncore;

pub use config::{EngineConfig, EventSpec, RefLimitPolicy};
pub use error::{Result, UncpmuError};
pub use orchestrator::UncorePoller;
pub use prom::UncoreMetricExporter;
pub use uncore::{UncoreBox, UncoreContext, UncoreEvent};
