use crate::error::{RegistryError, ResolutionError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use grunt_core::Params;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Something a task can name and the worker can run.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Run with the task's decoded parameter bag.
    async fn run(&self, params: Params) -> anyhow::Result<()>;
}

type CapabilityFn = dyn Fn(Params) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Adapts an async closure into a [`Capability`].
pub struct FnCapability {
    func: Box<CapabilityFn>,
}

impl FnCapability {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            func: Box::new(move |params| func(params).boxed()),
        }
    }
}

#[async_trait]
impl Capability for FnCapability {
    async fn run(&self, params: Params) -> anyhow::Result<()> {
        (self.func)(params).await
    }
}

/// Capabilities by `module.capability` key, populated at process start.
pub struct CapabilityRegistry {
    capabilities: RwLock<HashMap<String, Arc<dyn Capability>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        CapabilityRegistry {
            capabilities: RwLock::new(HashMap::new()),
        }
    }

    pub fn register<C: Capability + 'static>(
        &self,
        name: &str,
        capability: C,
    ) -> Result<(), RegistryError> {
        if !is_capability_name(name) {
            return Err(RegistryError::MalformedName(name.to_string()));
        }

        let mut capabilities = self.capabilities.write();
        if capabilities.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        capabilities.insert(name.to_string(), Arc::new(capability));
        Ok(())
    }

    pub fn register_fn<F, Fut>(&self, name: &str, func: F) -> Result<(), RegistryError>
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(name, FnCapability::new(func))
    }

    /// Look up the capability a task names.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Capability>, ResolutionError> {
        if !is_capability_name(name) {
            return Err(ResolutionError::MalformedName(name.to_string()));
        }
        self.capabilities
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ResolutionError::UnknownCapability(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.capabilities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.read().is_empty()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `module.capability`, where the module part may itself be dotted.
fn is_capability_name(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((module, capability)) => {
            !capability.is_empty()
                && !module.is_empty()
                && module.split('.').all(|part| !part.is_empty())
                && !name.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
