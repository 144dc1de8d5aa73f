//! Key-value store boundary.
//!
//! The store exposes a private namespace and a shared one visible to every
//! session. Nothing here locks across calls: concurrent writers, a cleanup
//! sweep and a redemption can interleave freely.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Shared,
    Private,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed value: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns `Ok(false)` when the store declined the write without faulting.
    async fn set(&self, key: &str, value: &str, scope: Scope) -> Result<bool, StoreError>;
    async fn get(&self, key: &str, scope: Scope) -> Result<Option<String>, StoreError>;
    async fn delete(&self, key: &str, scope: Scope) -> Result<(), StoreError>;
    async fn list(&self, prefix: &str, scope: Scope) -> Result<Vec<String>, StoreError>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Namespaces {
    shared: HashMap<String, String>,
    private: HashMap<String, String>,
}

impl Namespaces {
    fn scope(&self, scope: Scope) -> &HashMap<String, String> {
        match scope {
            Scope::Shared => &self.shared,
            Scope::Private => &self.private,
        }
    }

    fn scope_mut(&mut self, scope: Scope) -> &mut HashMap<String, String> {
        match scope {
            Scope::Shared => &mut self.shared,
            Scope::Private => &mut self.private,
        }
    }
}

/// In-process store, optionally snapshotted to a JSON file after every
/// mutation. A mutation whose snapshot cannot be written is rolled back and
/// reported as `Unavailable`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<Namespaces>>,
    persist_path: Option<PathBuf>,
    // Held from snapshot through rename so an older snapshot never lands
    // after a newer one.
    persist_lock: Arc<Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_persistence(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut store = Self::default();
        store.persist_path = Some(path.clone());
        if let Ok(bytes) = tokio::fs::read(&path).await {
            match serde_json::from_slice::<Namespaces>(&bytes) {
                Ok(saved) => {
                    debug!(
                        shared = saved.shared.len(),
                        private = saved.private.len(),
                        "loaded store snapshot"
                    );
                    *store.data.write().await = saved;
                }
                Err(err) => warn!(path = %path.display(), error = %err, "ignoring unreadable store snapshot"),
            }
        }
        store
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };

        let _guard = self.persist_lock.lock().await;
        let snapshot = {
            let data = self.data.read().await;
            data.clone()
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let tmp = path.with_extension("tmp");
        let written = match tokio::fs::write(&tmp, json).await {
            Ok(()) => tokio::fs::rename(&tmp, path).await,
            Err(err) => Err(err),
        };
        written.map_err(|err| {
            warn!(path = %path.display(), error = %err, "persist error");
            StoreError::Unavailable(format!("snapshot write to {} failed: {err}", path.display()))
        })
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, scope: Scope) -> Result<bool, StoreError> {
        let previous = self
            .data
            .write()
            .await
            .scope_mut(scope)
            .insert(key.to_string(), value.to_string());

        if let Err(err) = self.persist().await {
            let mut data = self.data.write().await;
            let entries = data.scope_mut(scope);
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(err);
        }
        Ok(true)
    }

    async fn get(&self, key: &str, scope: Scope) -> Result<Option<String>, StoreError> {
        Ok(self.data.read().await.scope(scope).get(key).cloned())
    }

    async fn delete(&self, key: &str, scope: Scope) -> Result<(), StoreError> {
        let Some(removed) = self.data.write().await.scope_mut(scope).remove(key) else {
            return Ok(());
        };

        if let Err(err) = self.persist().await {
            self.data
                .write()
                .await
                .scope_mut(scope)
                .insert(key.to_string(), removed);
            return Err(err);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str, scope: Scope) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().await;
        let mut keys: Vec<String> = data
            .scope(scope)
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
