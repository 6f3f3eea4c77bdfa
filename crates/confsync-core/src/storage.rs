//! Persistence adapter for the configuration store
//!
//! Storage is consumed through the [`ConfigStorage`] trait: asynchronous
//! key-value get/set plus a change-notification stream. Three tiers exist:
//!
//! - **local**: durable device-local storage, always present for the
//!   authoritative context
//! - **synced**: optional cross-device replication tier, written only for
//!   keys in the sync key set
//! - **managed**: optional read-only administrative tier; every key it
//!   supplies is locked
//!
//! Backends provided here: [`MemoryStorage`] (shared-inner, clonable, with a
//! read-only mode for managed tiers) and [`RedbStorage`] (durable, redb).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::ConfigResult;

mod memory;
mod redb;

pub use memory::MemoryStorage;
pub use redb::RedbStorage;

/// Reserved local-tier entry holding the authority's persisted lock set
///
/// Filtered out of value loads and storage-change handling; never a valid
/// configuration key.
pub const LOCKED_KEYS_ENTRY: &str = "$locked";

/// Capacity for storage change-notification channels
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A batch of entries that changed in a storage tier
#[derive(Debug, Clone)]
pub struct StorageChange {
    /// New value per changed key
    pub entries: BTreeMap<String, Value>,
}

/// Asynchronous key-value persistence with change notification
#[async_trait]
pub trait ConfigStorage: Send + Sync {
    /// Fetch the stored value for each of `keys`; absent keys are omitted
    async fn get(&self, keys: &[String]) -> ConfigResult<BTreeMap<String, Value>>;

    /// Store every entry in `entries`
    async fn set(&self, entries: BTreeMap<String, Value>) -> ConfigResult<()>;

    /// Subscribe to change notifications for this tier
    fn changes(&self) -> broadcast::Receiver<StorageChange>;
}

/// Which storage tier an event or operation concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageTier {
    /// Durable device-local storage
    Local,
    /// Cross-device replication storage
    Synced,
    /// Read-only administrative storage
    Managed,
}

/// The storage tiers available to an authoritative context
#[derive(Clone)]
pub struct StorageTiers {
    /// Durable local tier (required)
    pub local: Arc<dyn ConfigStorage>,
    /// Optional cross-device tier
    pub synced: Option<Arc<dyn ConfigStorage>>,
    /// Optional read-only administrative tier
    pub managed: Option<Arc<dyn ConfigStorage>>,
}

impl StorageTiers {
    /// Tiers with only a local backend
    pub fn local_only(local: Arc<dyn ConfigStorage>) -> Self {
        Self {
            local,
            synced: None,
            managed: None,
        }
    }

    /// Attach a cross-device synced tier
    pub fn with_synced(mut self, synced: Arc<dyn ConfigStorage>) -> Self {
        self.synced = Some(synced);
        self
    }

    /// Attach a read-only managed tier
    pub fn with_managed(mut self, managed: Arc<dyn ConfigStorage>) -> Self {
        self.managed = Some(managed);
        self
    }
}

fn change_channel() -> broadcast::Sender<StorageChange> {
    broadcast::channel(CHANGE_CHANNEL_CAPACITY).0
}
