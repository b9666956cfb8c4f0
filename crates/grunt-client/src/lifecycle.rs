use crate::{ClientError, Method, Result, Transport};
use grunt_core::{Device, NewTask, Task, TaskId};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Coordinator endpoint paths.
pub mod endpoints {
    pub const DEQUEUE_NEXT: &str = "/queue/tasks/dequeue_next";
    pub const HEARTBEAT: &str = "/queue/tasks/heartbeat";
    pub const MARK_COMPLETE: &str = "/queue/tasks/mark_complete";
    pub const MARK_FAILED: &str = "/queue/tasks/mark_failed";
    pub const PROPAGATE_FAILURE: &str = "/queue/tasks/propagate_failure";
    pub const SCHEDULE_NEXT_RECURRING: &str = "/queue/tasks/schedule_next_recurring";
    pub const KILL_THE_STALE: &str = "/queue/tasks/kill_the_stale";
    pub const ENQUEUE: &str = "/queue/tasks/enqueue";
    pub const UPDATE_ROUTINE_ID: &str = "/queue/tasks/update_routine_id";
    pub const GET: &str = "/queue/tasks/get";
}

/// Typed task lifecycle operations over a [`Transport`].
///
/// Every call is bounded by the transport's retry budget; an error here means
/// the coordinator could not be reached or answered with something unusable.
#[derive(Clone)]
pub struct LifecycleClient {
    transport: Arc<dyn Transport>,
}

impl LifecycleClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Claim the next runnable task for `device`, if any.
    ///
    /// Once the coordinator has claimed a record it is running under this
    /// worker, so a record that fails to decode but carries an id comes back
    /// as [`ClientError::UnreadableClaim`] for the caller to fail explicitly.
    pub async fn dequeue_next(&self, worker_id: &str, device: Device) -> Result<Option<Task>> {
        let result = self
            .post(
                endpoints::DEQUEUE_NEXT,
                json!({ "worker_id": worker_id, "device": device }),
            )
            .await?;
        let record = match result {
            Value::Null => None,
            Value::Array(mut records) => {
                if records.len() > 1 {
                    debug!(
                        count = records.len(),
                        "Coordinator returned more than one task, keeping the first"
                    );
                }
                records.into_iter().next()
            }
            record @ Value::Object(_) => Some(record),
            other => {
                return Err(ClientError::Decode {
                    endpoint: endpoints::DEQUEUE_NEXT.to_string(),
                    reason: format!("expected a task list, got {}", other),
                })
            }
        };
        let Some(record) = record else {
            return Ok(None);
        };

        let claimed_id = record
            .get("id")
            .and_then(|id| serde_json::from_value::<TaskId>(id.clone()).ok());
        match serde_json::from_value::<Task>(record) {
            Ok(task) => Ok(Some(task)),
            Err(e) => Err(match claimed_id {
                Some(task_id) => ClientError::UnreadableClaim {
                    task_id,
                    reason: e.to_string(),
                },
                None => ClientError::Decode {
                    endpoint: endpoints::DEQUEUE_NEXT.to_string(),
                    reason: e.to_string(),
                },
            }),
        }
    }

    /// Mark a task completed. The coordinator schedules any recurrence itself.
    pub async fn mark_complete(&self, task_id: TaskId) -> Result<Task> {
        let result = self
            .post(endpoints::MARK_COMPLETE, json!({ "id": task_id }))
            .await?;
        first_task(endpoints::MARK_COMPLETE, result)
    }

    pub async fn mark_failed(&self, task_id: TaskId, error_message: &str) -> Result<Task> {
        let result = self
            .post(
                endpoints::MARK_FAILED,
                json!({ "id": task_id, "error_message": error_message }),
            )
            .await?;
        first_task(endpoints::MARK_FAILED, result)
    }

    /// Fail every task transitively depending on `task_id`; returns the newly blocked ones.
    pub async fn propagate_failure(
        &self,
        task_id: TaskId,
        error_message: &str,
    ) -> Result<Vec<Task>> {
        let result = self
            .post(
                endpoints::PROPAGATE_FAILURE,
                json!({ "id": task_id, "error_message": error_message }),
            )
            .await?;
        decode_tasks(endpoints::PROPAGATE_FAILURE, result)
    }

    pub async fn schedule_next_recurring(&self, task_id: TaskId) -> Result<Option<Task>> {
        let result = self
            .post(endpoints::SCHEDULE_NEXT_RECURRING, json!({ "id": task_id }))
            .await?;
        Ok(decode_tasks(endpoints::SCHEDULE_NEXT_RECURRING, result)?
            .into_iter()
            .next())
    }

    /// Liveness signal for a claimed task. The acknowledgement is returned as-is.
    pub async fn heartbeat(&self, task_id: TaskId) -> Result<Value> {
        self.post(endpoints::HEARTBEAT, json!({ "id": task_id }))
            .await
    }

    /// Ask the coordinator to fail tasks whose heartbeat is older than the threshold.
    pub async fn kill_the_stale(&self, threshold_seconds: u64) -> Result<Vec<Task>> {
        let result = self
            .post(
                endpoints::KILL_THE_STALE,
                json!({ "stale_threshold_seconds": threshold_seconds }),
            )
            .await?;
        decode_tasks(endpoints::KILL_THE_STALE, result)
    }

    pub async fn enqueue(&self, task: &NewTask) -> Result<Task> {
        let payload = serde_json::to_value(task).map_err(|e| ClientError::Decode {
            endpoint: endpoints::ENQUEUE.to_string(),
            reason: e.to_string(),
        })?;
        let result = self.post(endpoints::ENQUEUE, payload).await?;
        first_task(endpoints::ENQUEUE, result)
    }

    /// Point a routine root's `routine_id` at itself.
    pub async fn update_routine_id(&self, task_id: TaskId) -> Result<Task> {
        let result = self
            .post(endpoints::UPDATE_ROUTINE_ID, json!({ "id": task_id }))
            .await?;
        first_task(endpoints::UPDATE_ROUTINE_ID, result)
    }

    pub async fn all_tasks(&self) -> Result<Vec<Task>> {
        let result = self.transport.send(Method::Get, endpoints::GET, None).await?;
        decode_tasks(endpoints::GET, result)
    }

    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
    }

    async fn post(&self, endpoint: &str, payload: Value) -> Result<Value> {
        Ok(self
            .transport
            .send(Method::Post, endpoint, Some(payload))
            .await?)
    }
}

/// Task lists arrive as an array; tolerate null (nothing) and a bare record.
fn decode_tasks(endpoint: &str, result: Value) -> Result<Vec<Task>> {
    let decoded = match result {
        Value::Null => return Ok(Vec::new()),
        Value::Object(_) => serde_json::from_value::<Task>(result).map(|task| vec![task]),
        other => serde_json::from_value::<Vec<Task>>(other),
    };
    decoded.map_err(|e| ClientError::Decode {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}

fn first_task(endpoint: &str, result: Value) -> Result<Task> {
    decode_tasks(endpoint, result)?
        .into_iter()
        .next()
        .ok_or_else(|| ClientError::EmptyResult(endpoint.to_string()))
}
