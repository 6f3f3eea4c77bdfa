//! confsync - replicated configuration store
//!
//! Keeps a key-value configuration namespace consistent across isolated
//! execution contexts that share no memory and communicate only via
//! asynchronous message passing and a key-value persistence service.
//!
//! ## Overview
//!
//! One context per namespace is **authoritative**: it owns the storage tiers
//! (durable local, optional cross-device synced, optional read-only managed)
//! and originates every broadcast. Every other context is a **replica** that
//! forwards mutations to the authority and applies the broadcasts it
//! receives. Consistency is last-write-wins, serialized through the
//! authority; administrative locking is the only concurrency control.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use confsync_core::{
//!     ConfigOptions, ConfigStore, ContextRole, MemoryStorage, MessageHub, Observer,
//!     StorageTiers,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let defaults = BTreeMap::from([
//!         ("theme".to_string(), json!("light")),
//!         ("fontSize".to_string(), json!(12)),
//!     ]);
//!
//!     let hub = MessageHub::new();
//!     let store = ConfigStore::authority(
//!         ConfigOptions::new(defaults),
//!         StorageTiers::local_only(Arc::new(MemoryStorage::new())),
//!         Arc::new(hub.endpoint(ContextRole::Authority)?),
//!     )?;
//!     store.ready().await?;
//!
//!     store.add_observer(Observer::callback(|key| println!("{key} changed")));
//!     store.set("fontSize", json!(16)).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod observer;
pub mod storage;
mod store;
pub mod sync;
pub mod types;

// Re-exports
pub use engine::ConfigStore;
pub use error::{ConfigError, ConfigResult};
pub use observer::{ConfigObserver, Observer, ObserverRegistry};
pub use storage::{
    ConfigStorage, MemoryStorage, RedbStorage, StorageChange, StorageTier, StorageTiers,
    LOCKED_KEYS_ENTRY,
};
pub use sync::{
    ConfigBroadcast, ConfigRequest, ConfigResponse, HubEndpoint, Inbound, MessageHub, PeerMessage,
    Transport, WireMessage,
};
pub use types::{ConfigOptions, ConfigSnapshot, ContextRole};
