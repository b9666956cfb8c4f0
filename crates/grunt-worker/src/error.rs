use std::backtrace::BacktraceStatus;
use std::fmt;
use thiserror::Error;

/// A claimed task whose capability could not be turned into a runnable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("'{0}' is not a valid capability name (expected module.capability)")]
    MalformedName(String),

    #[error("No capability registered for '{0}'")]
    UnknownCapability(String),

    #[error("Invalid parameters for '{name}': {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Task record could not be decoded: {0}")]
    UnreadableRecord(String),
}

/// A fault raised while a resolved capability was running.
#[derive(Error, Debug)]
pub enum ExecutionFault {
    #[error("{0}")]
    Failed(anyhow::Error),

    #[error("capability panicked: {0}")]
    Panicked(String),

    #[error("capability was cancelled before finishing")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("'{0}' is not a valid capability name (expected module.capability)")]
    MalformedName(String),

    #[error("Capability '{0}' is already registered")]
    Duplicate(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Coarse classification of a failed task, as logged and counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Resolution,
    Execution,
    Panic,
    Cancelled,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::Resolution => "ResolutionError",
            FaultKind::Execution => "ExecutionError",
            FaultKind::Panic => "Panic",
            FaultKind::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

impl ResolutionError {
    pub fn kind(&self) -> FaultKind {
        FaultKind::Resolution
    }

    /// Message recorded on the coordinator for this task.
    pub fn diagnostic(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

impl ExecutionFault {
    pub fn kind(&self) -> FaultKind {
        match self {
            ExecutionFault::Failed(_) => FaultKind::Execution,
            ExecutionFault::Panicked(_) => FaultKind::Panic,
            ExecutionFault::Cancelled => FaultKind::Cancelled,
        }
    }

    /// Message recorded on the coordinator: kind and message, then the cause
    /// chain and any captured backtrace.
    pub fn diagnostic(&self) -> String {
        let mut out = format!("{}: {}", self.kind(), self);
        if let ExecutionFault::Failed(err) = self {
            for cause in err.chain().skip(1) {
                out.push_str("\nCaused by: ");
                out.push_str(&cause.to_string());
            }
            let backtrace = err.backtrace();
            if backtrace.status() == BacktraceStatus::Captured {
                out.push_str("\n\nStack backtrace:\n");
                out.push_str(&backtrace.to_string());
            }
        }
        out
    }
}
