use crate::error::{ConfigError, ExecutionFault, FaultKind, ResolutionError};
use crate::heartbeat::Heartbeat;
use crate::registry::{Capability, CapabilityRegistry};
use grunt_client::LifecycleClient;
use grunt_core::{Params, Task, TaskId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// How one supervised task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(FaultKind),
}

/// Runs one claimed task to exactly one terminal report.
pub struct Supervisor {
    client: LifecycleClient,
    registry: Arc<CapabilityRegistry>,
    heartbeat_interval: Duration,
}

impl Supervisor {
    pub fn new(
        client: LifecycleClient,
        registry: Arc<CapabilityRegistry>,
        heartbeat_interval: Duration,
    ) -> Result<Self, ConfigError> {
        if heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        Ok(Supervisor {
            client,
            registry,
            heartbeat_interval,
        })
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, name = %task.name))]
    pub async fn supervise(&self, task: Task) -> TaskOutcome {
        let (capability, params) = match self.resolve(&task) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, "Task could not be resolved");
                self.report_failure(task.id, &e.diagnostic()).await;
                return TaskOutcome::Failed(e.kind());
            }
        };

        info!("Task started");
        let heartbeat = Heartbeat::start(self.client.clone(), task.id, self.heartbeat_interval)
            .map_err(|e| error!(error = %e, "Heartbeat not started"))
            .ok();
        let result = run_contained(capability, params).await;
        let beats = match heartbeat {
            Some(heartbeat) => heartbeat.stop().await,
            None => 0,
        };

        match result {
            Ok(()) => {
                info!(heartbeats = beats, "Task completed");
                if let Err(e) = self.client.mark_complete(task.id).await {
                    error!(error = %e, "Failed to report completion");
                }
                TaskOutcome::Completed
            }
            Err(fault) => {
                warn!(heartbeats = beats, kind = %fault.kind(), error = %fault, "Task failed");
                self.report_failure(task.id, &fault.diagnostic()).await;
                TaskOutcome::Failed(fault.kind())
            }
        }
    }

    /// Fail a claimed task whose record could not be decoded.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn reject(&self, task_id: TaskId, reason: &str) -> TaskOutcome {
        let e = ResolutionError::UnreadableRecord(reason.to_string());
        warn!(error = %e, "Claimed task rejected");
        self.report_failure(task_id, &e.diagnostic()).await;
        TaskOutcome::Failed(e.kind())
    }

    fn resolve(&self, task: &Task) -> Result<(Arc<dyn Capability>, Params), ResolutionError> {
        let params = task
            .params()
            .map_err(|e| ResolutionError::InvalidParameters {
                name: task.name.clone(),
                reason: e.to_string(),
            })?;
        let capability = self.registry.resolve(&task.name)?;
        Ok((capability, params))
    }

    /// Mark the task failed, then fail its dependents.
    async fn report_failure(&self, task_id: TaskId, diagnostic: &str) {
        if let Err(e) = self.client.mark_failed(task_id, diagnostic).await {
            error!(error = %e, "Failed to report failure");
        }
        match self.client.propagate_failure(task_id, diagnostic).await {
            Ok(blocked) if !blocked.is_empty() => {
                let ids: Vec<String> = blocked.iter().map(|t| t.id.to_string()).collect();
                warn!(blocked = %ids.join(","), "Dependent tasks blocked");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Failed to propagate failure"),
        }
    }
}

/// Run a capability in its own tokio task so a panic stays contained.
async fn run_contained(
    capability: Arc<dyn Capability>,
    params: Params,
) -> Result<(), ExecutionFault> {
    let handle = tokio::spawn(async move { capability.run(params).await });
    match handle.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ExecutionFault::Failed(e)),
        Err(e) if e.is_panic() => Err(ExecutionFault::Panicked(panic_message(e.into_panic()))),
        Err(_) => Err(ExecutionFault::Cancelled),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
