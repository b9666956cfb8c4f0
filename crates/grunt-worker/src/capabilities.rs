//! Capabilities every worker ships with.

use crate::error::RegistryError;
use crate::registry::{Capability, CapabilityRegistry};
use anyhow::{bail, Context};
use async_trait::async_trait;
use grunt_core::Params;
use std::time::Duration;
use tracing::info;

/// Logs its parameters.
pub struct Echo;

#[async_trait]
impl Capability for Echo {
    async fn run(&self, params: Params) -> anyhow::Result<()> {
        info!(params = %serde_json::Value::Object(params), "echo");
        Ok(())
    }
}

/// Suspends for `seconds` (float, default 1).
pub struct Sleep;

#[async_trait]
impl Capability for Sleep {
    async fn run(&self, params: Params) -> anyhow::Result<()> {
        let seconds = match params.get("seconds") {
            None => 1.0,
            Some(value) => value
                .as_f64()
                .context("'seconds' must be a number")?,
        };
        let duration = Duration::try_from_secs_f64(seconds)
            .with_context(|| format!("'seconds' out of range: {}", seconds))?;
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

/// Always fails, with `message` if given.
pub struct Fail;

#[async_trait]
impl Capability for Fail {
    async fn run(&self, params: Params) -> anyhow::Result<()> {
        let message = params
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("requested failure");
        bail!("{}", message)
    }
}

pub fn register_builtins(registry: &CapabilityRegistry) -> Result<(), RegistryError> {
    registry.register("builtin.echo", Echo)?;
    registry.register("builtin.sleep", Sleep)?;
    registry.register("builtin.fail", Fail)?;
    Ok(())
}
