//! Container healthchecks
//!
//! Provides:
//! - Healthcheck configuration and discovery from OCI annotations
//! - Probe execution, directly or through the runtime's `exec`
//! - The health state machine
//! - One timer thread per container, kept in a registry
//! - Status reporting to the parent monitor

pub mod config;
pub mod discovery;
pub mod machine;
pub mod probe;
pub mod registry;
pub mod reporter;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use config::HealthConfig;
pub use probe::{ExecMode, Probe, ProbeExecutor, ProbeOutcome};
pub use registry::TimerRegistry;
pub use reporter::StatusReporter;
