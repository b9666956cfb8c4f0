//! In-memory coordinator used by the unit tests.

use async_trait::async_trait;
use grunt_client::{endpoints, LifecycleClient, Method, Transport, TransportError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Call {
    pub endpoint: String,
    pub payload: Value,
    pub at: Instant,
}

#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    queue: Mutex<VecDeque<Value>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn client(self: &Arc<Self>) -> LifecycleClient {
        LifecycleClient::new(self.clone())
    }

    pub fn push_task(&self, id: i64, name: &str, data: Value) {
        self.push_record(json!({
            "id": id,
            "name": name,
            "data": data.to_string(),
            "status": "running",
            "device": "cpu",
        }));
    }

    /// Queue a raw record exactly as the coordinator would return it.
    pub fn push_record(&self, record: Value) {
        self.queue.lock().push_back(record);
    }

    pub fn fail(&self, endpoint: &'static str) {
        self.failing.lock().insert(endpoint);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        _method: Method,
        endpoint: &str,
        payload: Option<Value>,
    ) -> Result<Value, TransportError> {
        let payload = payload.unwrap_or(Value::Null);
        self.calls.lock().push(Call {
            endpoint: endpoint.to_string(),
            payload: payload.clone(),
            at: Instant::now(),
        });

        if self.failing.lock().contains(endpoint) {
            return Err(TransportError::with_status(
                503,
                format!("API error 503: {} unavailable", endpoint),
            ));
        }

        let id = payload["id"].clone();
        let record = |status: &str| json!([{ "id": id, "name": "x.y", "status": status }]);
        Ok(match endpoint {
            endpoints::DEQUEUE_NEXT => match self.queue.lock().pop_front() {
                Some(task) => json!([task]),
                None => json!([]),
            },
            endpoints::MARK_COMPLETE => record("completed"),
            endpoints::MARK_FAILED => record("failed"),
            endpoints::HEARTBEAT => json!({ "ok": true }),
            _ => json!([]),
        })
    }

    async fn shutdown(&self) {}
}
