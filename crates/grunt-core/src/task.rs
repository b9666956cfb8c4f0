use crate::{wire, Device, ModelError, Result, PREDECESSOR_DELIMITER};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Parameter bag handed to a capability.
pub type Params = serde_json::Map<String, Value>;

/// Coordinator-assigned task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        wire::parse_id(s).map_err(ModelError::InvalidParameters)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        wire::task_id(deserializer)
    }
}

/// Task status as tracked by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for its predecessors or for a worker
    Pending,
    /// Claimed by a worker
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error, or reaped as stale
    Failed,
    /// A predecessor failed; will never run
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        }
    }

    /// Terminal states never transition again (a recurring task spawns a new row instead).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Blocked
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "blocked" => Ok(TaskStatus::Blocked),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

/// A task record as returned by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Id of the routine's root task, if this task belongs to a routine
    #[serde(default, deserialize_with = "wire::opt_task_id")]
    pub routine_id: Option<TaskId>,

    /// Capability name in `module.capability` form
    pub name: String,

    /// Serialized parameter bag; see [`Task::params`]
    #[serde(default)]
    pub data: Option<Value>,

    #[serde(default, deserialize_with = "wire::predecessors")]
    pub predecessors: Vec<TaskId>,

    #[serde(default)]
    pub device: Device,

    pub status: TaskStatus,

    #[serde(default, deserialize_with = "wire::opt_timestamp")]
    pub run_at: Option<DateTime<Utc>>,

    /// Recurrence descriptor, interpreted by the coordinator only
    #[serde(default)]
    pub frequency: Option<String>,

    /// Last liveness signal, written by the coordinator only
    #[serde(default, deserialize_with = "wire::opt_timestamp")]
    pub heartbeat: Option<DateTime<Utc>>,
}

impl Task {
    /// Decode the parameter bag.
    ///
    /// `data` is normally a JSON-encoded object string; inline objects are accepted
    /// too. Null and empty strings decode to an empty bag.
    pub fn params(&self) -> Result<Params> {
        let value = match &self.data {
            None | Some(Value::Null) => return Ok(Params::new()),
            Some(Value::String(raw)) if raw.trim().is_empty() => return Ok(Params::new()),
            Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
                .map_err(|e| ModelError::InvalidParameters(e.to_string()))?,
            Some(other) => other.clone(),
        };

        match value {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Params::new()),
            other => Err(ModelError::InvalidParameters(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn is_routine_member(&self) -> bool {
        self.routine_id.is_some_and(|root| root != self.id)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Enqueue payload for the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub routine_id: Option<TaskId>,
    pub name: String,
    /// JSON-encoded parameter bag
    pub data: Option<String>,
    /// Predecessor ids joined with [`PREDECESSOR_DELIMITER`]
    pub predecessors: Option<String>,
    pub device: Device,
    pub status: TaskStatus,
    pub run_at: Option<String>,
    pub frequency: Option<String>,
}

impl NewTask {
    /// A pending task with no parameters, predecessors or schedule.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            routine_id: None,
            name: name.into(),
            data: None,
            predecessors: None,
            device: Device::Cpu,
            status: TaskStatus::Pending,
            run_at: None,
            frequency: None,
        }
    }

    /// The id anchor of a routine: born completed so it never gets dequeued.
    pub fn routine_root(routine_name: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Completed,
            ..Self::new(routine_name)
        }
    }

    pub fn with_routine(mut self, routine_id: TaskId) -> Self {
        self.routine_id = Some(routine_id);
        self
    }

    pub fn with_params(mut self, params: &Value) -> serde_json::Result<Self> {
        self.data = Some(serde_json::to_string(params)?);
        Ok(self)
    }

    pub fn with_predecessors(mut self, predecessors: &[TaskId]) -> Self {
        let joined = predecessors
            .iter()
            .map(TaskId::to_string)
            .collect::<Vec<_>>()
            .join(&PREDECESSOR_DELIMITER.to_string());
        self.predecessors = Some(joined);
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_schedule(mut self, run_at: Option<String>, frequency: Option<String>) -> Self {
        self.run_at = run_at;
        self.frequency = frequency;
        self
    }
}
