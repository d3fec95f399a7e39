pub mod uncore;

pub use uncore::UncoreMetricExporter;
