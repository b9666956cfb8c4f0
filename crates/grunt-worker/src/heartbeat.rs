//! Liveness signal for one claimed task.

use crate::error::ConfigError;
use grunt_client::LifecycleClient;
use grunt_core::TaskId;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(90);

/// A background heartbeat bound to one task.
///
/// Sends `heartbeat(task_id)` once per interval, starting one interval after
/// [`Heartbeat::start`]. Failed sends are logged and skipped. Dropping the
/// handle cancels the signal; [`Heartbeat::stop`] also waits for it.
pub struct Heartbeat {
    task_id: TaskId,
    token: CancellationToken,
    handle: Option<JoinHandle<u64>>,
}

impl Heartbeat {
    /// Spawn the signal. A zero `period` is rejected.
    pub fn start(
        client: LifecycleClient,
        task_id: TaskId,
        period: Duration,
    ) -> Result<Self, ConfigError> {
        if period.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut sent = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    result = client.heartbeat(task_id) => match result {
                        Ok(_) => {
                            sent += 1;
                            debug!(task_id = %task_id, sent, "Heartbeat sent");
                        }
                        Err(e) => warn!(task_id = %task_id, error = %e, "Heartbeat failed"),
                    },
                }
            }
            sent
        });

        Ok(Heartbeat {
            task_id,
            token,
            handle: Some(handle),
        })
    }

    /// Cancel and wait for the signal to finish; returns the number of successful sends.
    pub async fn stop(mut self) -> u64 {
        self.token.cancel();
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        match handle.await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "Heartbeat task ended abnormally");
                0
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
