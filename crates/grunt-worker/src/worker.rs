use crate::config::WorkerConfig;
use crate::error::ConfigError;
use crate::registry::CapabilityRegistry;
use crate::supervisor::{Supervisor, TaskOutcome};
use grunt_client::{ClientError, LifecycleClient};
use grunt_core::Device;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Claimant tag sent with dequeue calls: `<prefix>-<pid>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    prefix: String,
    pid: u32,
}

impl WorkerIdentity {
    pub fn new(prefix: impl Into<String>, pid: u32) -> Self {
        Self {
            prefix: prefix.into(),
            pid,
        }
    }

    /// Identity of the current process.
    pub fn current(prefix: impl Into<String>) -> Self {
        Self::new(prefix, std::process::id())
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prefix, self.pid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    RuntimeBudget,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub completed: u64,
    pub failed: u64,
    pub stop_reason: StopReason,
}

/// Poll loop: reap stale tasks, claim one, supervise it, repeat.
pub struct Worker {
    client: LifecycleClient,
    supervisor: Supervisor,
    identity: WorkerIdentity,
    device: Device,
    poll_interval: Duration,
    runtime_budget: Option<Duration>,
    stale_threshold_secs: u64,
}

impl Worker {
    pub fn new(
        client: LifecycleClient,
        registry: Arc<CapabilityRegistry>,
        config: &WorkerConfig,
    ) -> Result<Self, ConfigError> {
        let supervisor = Supervisor::new(client.clone(), registry, config.heartbeat_interval()?)?;
        Ok(Worker {
            client,
            supervisor,
            identity: WorkerIdentity::current(config.name_prefix.clone()),
            device: config.device,
            poll_interval: config.poll_interval()?,
            runtime_budget: config.runtime_budget()?,
            stale_threshold_secs: config.stale_threshold_secs,
        })
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Run until the runtime budget is spent or `shutdown` is cancelled.
    ///
    /// Both are checked between iterations only; a claimed task always runs to
    /// its terminal report.
    pub async fn run(&self, shutdown: CancellationToken) -> RunSummary {
        let started = Instant::now();
        let worker_id = self.identity.to_string();
        info!(
            worker = %worker_id,
            device = %self.device,
            poll_ms = self.poll_interval.as_millis() as u64,
            budget_secs = ?self.runtime_budget.map(|b| b.as_secs_f64()),
            "Worker started"
        );

        let mut iterations = 0u64;
        let mut completed = 0u64;
        let mut failed = 0u64;

        let stop_reason = loop {
            if shutdown.is_cancelled() {
                break StopReason::Shutdown;
            }
            if self.runtime_budget.is_some_and(|budget| started.elapsed() > budget) {
                break StopReason::RuntimeBudget;
            }
            iterations += 1;

            self.reap_stale().await;

            match self.client.dequeue_next(&worker_id, self.device).await {
                Ok(Some(task)) => {
                    info!(task_id = %task.id, name = %task.name, "Task claimed");
                    match self.supervisor.supervise(task).await {
                        TaskOutcome::Completed => completed += 1,
                        TaskOutcome::Failed(_) => failed += 1,
                    }
                    continue;
                }
                Ok(None) => debug!("No task available"),
                Err(ClientError::UnreadableClaim { task_id, reason }) => {
                    warn!(task_id = %task_id, "Claimed task could not be decoded");
                    self.supervisor.reject(task_id, &reason).await;
                    failed += 1;
                    continue;
                }
                Err(e) => warn!(error = %e, "Dequeue failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        };

        info!(
            worker = %worker_id,
            iterations,
            completed,
            failed,
            reason = ?stop_reason,
            "Worker stopped"
        );
        RunSummary {
            iterations,
            completed,
            failed,
            stop_reason,
        }
    }

    async fn reap_stale(&self) {
        match self.client.kill_the_stale(self.stale_threshold_secs).await {
            Ok(reaped) if !reaped.is_empty() => {
                info!(count = reaped.len(), "Reaped stale tasks");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Stale task reaping failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::register_builtins;
    use crate::testing::RecordingTransport;
    use grunt_client::endpoints;
    use serde_json::json;

    fn worker(transport: &Arc<RecordingTransport>, config: WorkerConfig) -> Worker {
        let registry = CapabilityRegistry::new();
        register_builtins(&registry).unwrap();
        Worker::new(transport.client(), Arc::new(registry), &config).unwrap()
    }

    fn config(budget_secs: f64) -> WorkerConfig {
        WorkerConfig {
            name_prefix: "test-grunt".to_string(),
            poll_interval_secs: 2.0,
            runtime_budget_secs: Some(budget_secs),
            heartbeat_interval_secs: 10,
            ..WorkerConfig::default()
        }
    }

    #[test]
    fn test_identity_format() {
        assert_eq!(WorkerIdentity::new("unix-grunt", 4242).to_string(), "unix-grunt-4242");
        assert!(WorkerIdentity::current("p")
            .to_string()
            .ends_with(&std::process::id().to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_loop_stops_after_budget() {
        let transport = RecordingTransport::new();
        let started = Instant::now();

        let summary = worker(&transport, config(10.0))
            .run(CancellationToken::new())
            .await;

        let elapsed = started.elapsed();
        assert_eq!(summary.stop_reason, StopReason::RuntimeBudget);
        assert_eq!(summary.completed + summary.failed, 0);
        assert!(elapsed > Duration::from_secs(10));
        assert!(elapsed <= Duration::from_secs(12) + Duration::from_millis(100));

        let dequeues = transport.calls_to(endpoints::DEQUEUE_NEXT);
        assert_eq!(dequeues.len() as u64, summary.iterations);
        assert_eq!(
            dequeues[0].payload["worker_id"],
            json!(format!("test-grunt-{}", std::process::id()))
        );
        assert_eq!(dequeues[0].payload["device"], json!("cpu"));
        assert!(transport.calls_to(endpoints::MARK_COMPLETE).is_empty());
        assert!(transport.calls_to(endpoints::MARK_FAILED).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaps_before_every_dequeue() {
        let transport = RecordingTransport::new();
        worker(&transport, config(4.0))
            .run(CancellationToken::new())
            .await;

        let calls = transport.calls();
        assert!(!calls.is_empty());
        for pair in calls.chunks(2) {
            assert_eq!(pair[0].endpoint, endpoints::KILL_THE_STALE);
            assert_eq!(pair[0].payload, json!({ "stale_threshold_seconds": 300 }));
            assert_eq!(pair[1].endpoint, endpoints::DEQUEUE_NEXT);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auxiliary_failures_do_not_stop_the_loop() {
        let transport = RecordingTransport::new();
        transport.fail(endpoints::KILL_THE_STALE);
        transport.fail(endpoints::DEQUEUE_NEXT);

        let summary = worker(&transport, config(6.0))
            .run(CancellationToken::new())
            .await;

        assert_eq!(summary.stop_reason, StopReason::RuntimeBudget);
        assert!(summary.iterations >= 3);
        assert_eq!(
            transport.calls_to(endpoints::DEQUEUE_NEXT).len() as u64,
            summary.iterations
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_are_supervised_back_to_back() {
        let transport = RecordingTransport::new();
        transport.push_task(1, "builtin.echo", json!({"a": 1}));
        transport.push_task(2, "builtin.fail", json!({}));
        transport.push_task(3, "nowhere.nothing", json!({}));

        let summary = worker(&transport, config(1.0))
            .run(CancellationToken::new())
            .await;

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 2);

        let terminal: Vec<(String, serde_json::Value)> = transport
            .calls()
            .into_iter()
            .filter(|c| {
                c.endpoint == endpoints::MARK_COMPLETE || c.endpoint == endpoints::MARK_FAILED
            })
            .map(|c| (c.endpoint, c.payload["id"].clone()))
            .collect();
        assert_eq!(
            terminal,
            vec![
                (endpoints::MARK_COMPLETE.to_string(), json!(1)),
                (endpoints::MARK_FAILED.to_string(), json!(2)),
                (endpoints::MARK_FAILED.to_string(), json!(3)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_claim_is_failed_not_orphaned() {
        let transport = RecordingTransport::new();
        transport.push_record(json!({
            "id": 5,
            "name": "builtin.echo",
            "data": "{}",
            "status": "in-flight",
        }));
        transport.push_task(6, "builtin.echo", json!({}));

        let summary = worker(&transport, config(1.0))
            .run(CancellationToken::new())
            .await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 1);

        let failed = transport.calls_to(endpoints::MARK_FAILED);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].payload["id"], json!(5));
        assert!(failed[0].payload["error_message"]
            .as_str()
            .unwrap()
            .starts_with("ResolutionError: Task record could not be decoded"));
        assert_eq!(
            transport.calls_to(endpoints::PROPAGATE_FAILURE)[0].payload["id"],
            json!(5)
        );
        assert!(transport.calls_to(endpoints::HEARTBEAT).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_idle_wait() {
        let transport = RecordingTransport::new();
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let mut config = config(1000.0);
        config.runtime_budget_secs = None;
        let summary = worker(&transport, config).run(shutdown).await;

        assert_eq!(summary.stop_reason, StopReason::Shutdown);
        assert_eq!(summary.iterations, 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_zero_heartbeat_interval_is_rejected() {
        let transport = RecordingTransport::new();
        let config = WorkerConfig {
            heartbeat_interval_secs: 0,
            ..config(10.0)
        };
        let result = Worker::new(
            transport.client(),
            Arc::new(CapabilityRegistry::new()),
            &config,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
