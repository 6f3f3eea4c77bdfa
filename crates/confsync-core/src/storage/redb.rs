//! Durable storage backend using redb
//!
//! Values are stored as serde_json bytes in a single table. Change
//! notifications fire after each committed write, so every store handle
//! sharing this backend observes the same change stream.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use redb::{Database, TableDefinition};
use serde_json::Value;
use tokio::sync::broadcast;

use super::{change_channel, ConfigStorage, StorageChange};
use crate::error::{ConfigError, ConfigResult};

const CONFIG_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("config");

/// Durable [`ConfigStorage`] backend using redb
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<RwLock<Database>>,
    change_tx: broadcast::Sender<StorageChange>,
}

impl RedbStorage {
    /// Open or create a database at the given path
    pub fn new(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CONFIG_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            change_tx: change_channel(),
        })
    }
}

#[async_trait]
impl ConfigStorage for RedbStorage {
    async fn get(&self, keys: &[String]) -> ConfigResult<BTreeMap<String, Value>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(CONFIG_TABLE)?;

        let mut values = BTreeMap::new();
        for key in keys {
            if let Some(stored) = table.get(key.as_str())? {
                let value: Value = serde_json::from_slice(stored.value())
                    .map_err(|e| ConfigError::Serialization(e.to_string()))?;
                values.insert(key.clone(), value);
            }
        }
        Ok(values)
    }

    async fn set(&self, entries: BTreeMap<String, Value>) -> ConfigResult<()> {
        {
            let db = self.db.read();
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(CONFIG_TABLE)?;
                for (key, value) in &entries {
                    let data = serde_json::to_vec(value)
                        .map_err(|e| ConfigError::Serialization(e.to_string()))?;
                    table.insert(key.as_str(), data.as_slice())?;
                }
            }
            write_txn.commit()?;
        }
        let _ = self.change_tx.send(StorageChange { entries });
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<StorageChange> {
        self.change_tx.subscribe()
    }
}
