//! Coordinator client: reliable transport, typed lifecycle operations and
//! routine expansion.

mod lifecycle;
mod retry;
pub mod routine;
mod transport;

pub use lifecycle::{endpoints, LifecycleClient};
pub use retry::RetryPolicy;
pub use routine::{enqueue_routine, RoutineError, RoutineSubmission, RoutineTask, SubmittedTask};
pub use transport::{HttpTransport, Method, Transport};

use grunt_core::TaskId;
use thiserror::Error;

/// Failure of a coordinator request after the retry budget was spent.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct TransportError {
    /// HTTP status, when the coordinator answered at all
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Unexpected response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    /// The coordinator claimed a task for this worker but its record is unusable.
    #[error("Claimed task {task_id} could not be decoded: {reason}")]
    UnreadableClaim { task_id: TaskId, reason: String },

    #[error("Coordinator returned no task for {0}")]
    EmptyResult(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
