//! In-memory kernel registry.

use std::collections::HashMap;
use tokio::sync::RwLock;

use super::error::{KernelError, KernelResult};
use super::models::{Kernel, KernelPatch};

#[derive(Debug, Default)]
struct Entries {
    kernels: HashMap<String, Kernel>,
    /// Ids in insertion order.
    order: Vec<String>,
}

/// Kernels keyed by id, listed in insertion order.
#[derive(Debug, Default)]
pub struct KernelRegistry {
    entries: RwLock<Entries>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list(&self) -> Vec<Kernel> {
        let entries = self.entries.read().await;
        entries
            .order
            .iter()
            .filter_map(|id| entries.kernels.get(id).cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.kernels.len()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.kernels.contains_key(id)
    }

    pub async fn get(&self, id: &str) -> KernelResult<Kernel> {
        self.entries
            .read()
            .await
            .kernels
            .get(id)
            .cloned()
            .ok_or_else(|| KernelError::NotFound(id.to_string()))
    }

    /// Register a new kernel. Fails if the id is already taken.
    pub async fn insert(&self, kernel: Kernel) -> KernelResult<Kernel> {
        let mut entries = self.entries.write().await;
        if entries.kernels.contains_key(&kernel.id) {
            return Err(KernelError::AlreadyExists(kernel.id));
        }
        entries.order.push(kernel.id.clone());
        entries.kernels.insert(kernel.id.clone(), kernel.clone());
        Ok(kernel)
    }

    pub async fn update(&self, id: &str, patch: &KernelPatch) -> KernelResult<Kernel> {
        self.modify(id, |kernel| patch.apply(kernel)).await
    }

    /// Mutate a kernel in place and return the new state.
    pub async fn modify<F>(&self, id: &str, f: F) -> KernelResult<Kernel>
    where
        F: FnOnce(&mut Kernel),
    {
        let mut entries = self.entries.write().await;
        let kernel = entries
            .kernels
            .get_mut(id)
            .ok_or_else(|| KernelError::NotFound(id.to_string()))?;
        f(kernel);
        Ok(kernel.clone())
    }

    /// Remove a kernel. Absent ids return `None`.
    pub async fn remove(&self, id: &str) -> Option<Kernel> {
        let mut entries = self.entries.write().await;
        let removed = entries.kernels.remove(id)?;
        entries.order.retain(|existing| existing != id);
        Some(removed)
    }
}
