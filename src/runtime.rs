//! Runtime glue that wires configuration, telemetry, and the block-driven
//! runner.

pub mod config;
pub mod runner;
pub mod telemetry;
