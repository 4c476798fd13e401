//! Runtime glue that wires configuration, cancellable waits, telemetry, and
//! the process runner.

pub(crate) mod backoff;
pub mod config;
pub mod runner;
pub mod telemetry;
