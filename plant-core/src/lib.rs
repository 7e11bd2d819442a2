// plant-core library: runtime services for the plant monitoring system.
// Shared types and the store implementations are in the plant-common crate.

pub mod broker;
pub mod config;
pub mod ingest;
pub mod kpi;
pub mod metrics;
pub mod orders;
pub mod predictor;

// Re-export plant-common for convenience
pub use plant_common::{data, error, logging};
