use crate::{RetryPolicy, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Longest slice of a response body quoted in an error message.
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        }
    }
}

/// Request layer between the worker and the coordinator.
///
/// Implementations own retries: an `Err` means the retry budget is spent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and return the decoded result.
    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        payload: Option<Value>,
    ) -> Result<Value, TransportError>;

    /// Release the underlying connection. Safe to call more than once.
    async fn shutdown(&self);
}

/// JSON-over-HTTP transport with a lazily created, reused connection pool.
pub struct HttpTransport {
    base_url: String,
    policy: RetryPolicy,
    timeout: Duration,
    client: Mutex<Option<reqwest::Client>>,
}

impl HttpTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

    pub fn new(base_url: impl Into<String>, policy: RetryPolicy) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            policy,
            timeout: Self::DEFAULT_TIMEOUT,
            client: Mutex::new(None),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether a connection pool is currently held.
    pub fn is_connected(&self) -> bool {
        self.client.lock().is_some()
    }

    /// Current pool, created on first use or after a shutdown.
    fn client(&self) -> Result<reqwest::Client, TransportError> {
        let mut slot = self.client.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| TransportError::new(format!("Failed to build HTTP client: {}", e)))?;
        debug!(base_url = %self.base_url, "Opened coordinator connection pool");
        *slot = Some(client.clone());
        Ok(client)
    }

    async fn send_once(
        &self,
        method: Method,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<Value, TransportError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self.client()?.request(method.into(), &url);
        if let Some(body) = payload {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::new(format!("{} {} failed: {}", method, endpoint, e)))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            TransportError::with_status(
                status.as_u16(),
                format!("Failed to read response body: {}", e),
            )
        })?;

        if status != StatusCode::OK {
            return Err(TransportError::with_status(
                status.as_u16(),
                format!("API error {}: {}", status.as_u16(), truncate(text.trim())),
            ));
        }

        let body: Value = serde_json::from_str(&text).map_err(|_| {
            TransportError::with_status(
                status.as_u16(),
                format!("Invalid JSON response: {}", truncate(text.trim())),
            )
        })?;

        Ok(unwrap_result(body))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        payload: Option<Value>,
    ) -> Result<Value, TransportError> {
        self.policy
            .run(endpoint, || self.send_once(method, endpoint, payload.as_ref()))
            .await
    }

    async fn shutdown(&self) {
        if self.client.lock().take().is_some() {
            debug!(base_url = %self.base_url, "Closed coordinator connection pool");
        }
    }
}

/// The coordinator wraps payloads as `{"result": ...}`; anything else is passed through.
pub(crate) fn unwrap_result(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(ERROR_BODY_LIMIT).collect()
}
