//! Worker runtime: capability dispatch, supervised execution with heartbeats,
//! and the poll loop.

pub mod capabilities;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod registry;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::{CoordinatorConfig, GruntConfig, LoggingConfig, WorkerConfig};
pub use error::{ConfigError, ExecutionFault, FaultKind, RegistryError, ResolutionError};
pub use heartbeat::Heartbeat;
pub use registry::{Capability, CapabilityRegistry, FnCapability};
pub use supervisor::{Supervisor, TaskOutcome};
pub use worker::{RunSummary, StopReason, Worker, WorkerIdentity};
