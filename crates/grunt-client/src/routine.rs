//! Routine expansion: submit a declared task list as dependency-ordered queue entries.
//!
//! Declared order is the submission order. A predecessor must appear earlier in
//! the list than the task naming it; forward references and cycles are both
//! rejected as unresolved predecessors. No topological sort is attempted.

use crate::{ClientError, LifecycleClient};
use grunt_core::{Device, NewTask, Task, TaskId};
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum RoutineError {
    /// A predecessor had not been submitted when the task naming it was reached.
    #[error(
        "Unresolved predecessor '{predecessor}' of task '{task}' in routine '{routine}' \
         (not declared before it, or part of a cycle)"
    )]
    Dependency {
        routine: String,
        task: String,
        predecessor: String,
    },

    #[error("Task '{task}' is declared more than once in routine '{routine}'")]
    DuplicateTask { routine: String, task: String },

    #[error("Failed to serialize data of task '{task}': {source}")]
    Serialize {
        task: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// One entry of a routine declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineTask {
    /// Routine-local identifier used by `predecessors`
    #[serde(deserialize_with = "local_id")]
    pub id: String,

    /// Capability name in `module.capability` form
    pub name: String,

    /// Parameter bag; an empty object when absent
    #[serde(default)]
    pub data: Option<Value>,

    /// Routine-local ids this task waits for
    #[serde(default, deserialize_with = "local_ids")]
    pub predecessors: Vec<String>,

    #[serde(default)]
    pub device: Device,

    #[serde(default)]
    pub run_at: Option<String>,

    #[serde(default)]
    pub frequency: Option<String>,
}

impl RoutineTask {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            data: None,
            predecessors: Vec::new(),
            device: Device::Cpu,
            run_at: None,
            frequency: None,
        }
    }

    pub fn after<I, S>(mut self, predecessors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predecessors = predecessors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A declared task together with the record the coordinator created for it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedTask {
    pub declared: RoutineTask,
    pub task: Task,
}

impl SubmittedTask {
    pub fn coordinator_id(&self) -> TaskId {
        self.task.id
    }
}

/// Result of a routine expansion, in declared order, addressable by local id.
#[derive(Debug, Clone)]
pub struct RoutineSubmission {
    routine: String,
    root: Task,
    tasks: Vec<SubmittedTask>,
    by_local_id: HashMap<String, usize>,
}

impl RoutineSubmission {
    fn new(routine: &str, root: Task) -> Self {
        Self {
            routine: routine.to_string(),
            root,
            tasks: Vec::new(),
            by_local_id: HashMap::new(),
        }
    }

    fn push(&mut self, declared: RoutineTask, task: Task) {
        self.by_local_id.insert(declared.id.clone(), self.tasks.len());
        self.tasks.push(SubmittedTask { declared, task });
    }

    pub fn routine(&self) -> &str {
        &self.routine
    }

    /// The synthetic root task anchoring the routine.
    pub fn root(&self) -> &Task {
        &self.root
    }

    pub fn routine_id(&self) -> TaskId {
        self.root.id
    }

    pub fn get(&self, local_id: &str) -> Option<&SubmittedTask> {
        self.by_local_id.get(local_id).map(|&i| &self.tasks[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubmittedTask> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Local id to coordinator record.
    pub fn into_map(self) -> HashMap<String, SubmittedTask> {
        self.tasks
            .into_iter()
            .map(|submitted| (submitted.declared.id.clone(), submitted))
            .collect()
    }
}

/// Submit `tasks` as routine `routine`.
///
/// Tasks already submitted when an error occurs stay queued; there is no rollback.
pub async fn enqueue_routine(
    client: &LifecycleClient,
    routine: &str,
    tasks: &[RoutineTask],
) -> Result<RoutineSubmission, RoutineError> {
    let root = client.enqueue(&NewTask::routine_root(routine)).await?;
    let root = client.update_routine_id(root.id).await?;
    let routine_id = root.id;
    info!(routine, routine_id = %routine_id, tasks = tasks.len(), "Routine root created");

    let mut submission = RoutineSubmission::new(routine, root);

    for declared in tasks {
        if submission.get(&declared.id).is_some() {
            return Err(RoutineError::DuplicateTask {
                routine: routine.to_string(),
                task: declared.id.clone(),
            });
        }

        let predecessors = declared
            .predecessors
            .iter()
            .map(|local| {
                submission
                    .get(local)
                    .map(SubmittedTask::coordinator_id)
                    .ok_or_else(|| RoutineError::Dependency {
                        routine: routine.to_string(),
                        task: declared.id.clone(),
                        predecessor: local.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let params = declared
            .data
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let payload = NewTask::new(declared.name.clone())
            .with_routine(routine_id)
            .with_params(&params)
            .map_err(|source| RoutineError::Serialize {
                task: declared.id.clone(),
                source,
            })?
            .with_predecessors(&predecessors)
            .with_device(declared.device)
            .with_schedule(declared.run_at.clone(), declared.frequency.clone());

        let task = client.enqueue(&payload).await?;
        debug!(
            routine,
            local_id = %declared.id,
            task_id = %task.id,
            predecessors = ?predecessors,
            "Routine task enqueued"
        );
        submission.push(declared.clone(), task);
    }

    info!(routine, routine_id = %routine_id, submitted = submission.len(), "Routine enqueued");
    Ok(submission)
}

/// Routine files may use numbers or strings for local ids.
#[derive(Deserialize)]
#[serde(untagged)]
enum LocalId {
    Text(String),
    Number(i64),
}

impl From<LocalId> for String {
    fn from(id: LocalId) -> Self {
        match id {
            LocalId::Text(s) => s,
            LocalId::Number(n) => n.to_string(),
        }
    }
}

fn local_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    LocalId::deserialize(deserializer).map(String::from)
}

fn local_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids = Option::<Vec<LocalId>>::deserialize(deserializer)?;
    Ok(ids
        .unwrap_or_default()
        .into_iter()
        .map(String::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declared_task_accepts_numeric_ids() {
        let declared: RoutineTask = serde_json::from_value(json!({
            "id": 2,
            "name": "etl.transform",
            "predecessors": [1, "extract"],
            "device": "gpu"
        }))
        .unwrap();

        assert_eq!(declared.id, "2");
        assert_eq!(declared.predecessors, vec!["1", "extract"]);
        assert_eq!(declared.device, Device::Gpu);
        assert!(declared.data.is_none());
    }

    #[test]
    fn test_declared_task_defaults() {
        let declared: RoutineTask =
            serde_json::from_value(json!({ "id": "a", "name": "x.y", "predecessors": null }))
                .unwrap();
        assert!(declared.predecessors.is_empty());
        assert_eq!(declared.device, Device::Cpu);
        assert!(declared.run_at.is_none());
    }

    #[test]
    fn test_dependency_error_names_routine_and_predecessor() {
        let err = RoutineError::Dependency {
            routine: "nightly".to_string(),
            task: "load".to_string(),
            predecessor: "extract".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("nightly"));
        assert!(message.contains("extract"));
    }
}
