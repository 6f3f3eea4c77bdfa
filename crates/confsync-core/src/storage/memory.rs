//! In-memory storage backend
//!
//! Clones share the same underlying map, so one handle can stand in for an
//! external writer (e.g. an administrator pushing a managed value) while
//! another is owned by the store. The read-only mode backs managed tiers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{change_channel, ConfigStorage, StorageChange};
use crate::error::{ConfigError, ConfigResult};

struct MemoryInner {
    entries: RwLock<BTreeMap<String, Value>>,
    change_tx: broadcast::Sender<StorageChange>,
    read_only: bool,
}

/// In-memory [`ConfigStorage`] backend
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<MemoryInner>,
}

impl MemoryStorage {
    /// Create an empty read-write store
    pub fn new() -> Self {
        Self::with_values(BTreeMap::new())
    }

    /// Create a read-write store seeded with `values`
    pub fn with_values(values: BTreeMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                entries: RwLock::new(values),
                change_tx: change_channel(),
                read_only: false,
            }),
        }
    }

    /// Create a read-only store seeded with `values`
    ///
    /// `set` through the [`ConfigStorage`] trait is rejected; use
    /// [`MemoryStorage::push`] to simulate an administrative update.
    pub fn read_only(values: BTreeMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                entries: RwLock::new(values),
                change_tx: change_channel(),
                read_only: true,
            }),
        }
    }

    /// Apply entries as an external writer, bypassing the read-only guard,
    /// and fire a change notification
    pub fn push(&self, entries: BTreeMap<String, Value>) {
        {
            let mut stored = self.inner.entries.write();
            for (key, value) in &entries {
                stored.insert(key.clone(), value.clone());
            }
        }
        let _ = self.inner.change_tx.send(StorageChange { entries });
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStorage for MemoryStorage {
    async fn get(&self, keys: &[String]) -> ConfigResult<BTreeMap<String, Value>> {
        let stored = self.inner.entries.read();
        Ok(keys
            .iter()
            .filter_map(|k| stored.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set(&self, entries: BTreeMap<String, Value>) -> ConfigResult<()> {
        if self.inner.read_only {
            return Err(ConfigError::ReadOnlyStorage);
        }
        self.push(entries);
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<StorageChange> {
        self.inner.change_tx.subscribe()
    }
}
