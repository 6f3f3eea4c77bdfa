//! Durability and storage-tier integration tests
//!
//! Redb-backed stores surviving restart, lock-set persistence, the
//! remote-synced bootstrap pass, and storage-change events from external
//! writers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use confsync_core::{
    ConfigOptions, ConfigStorage, ConfigStore, ContextRole, MemoryStorage, MessageHub,
    Observer, RedbStorage, StorageTiers,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

fn defaults() -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("theme".to_string(), json!("light")),
        ("fontSize".to_string(), json!(12)),
    ])
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within timeout");
}

fn redb_authority(hub: &MessageHub, dir: &TempDir) -> ConfigStore {
    let storage = RedbStorage::new(dir.path().join("config.redb")).unwrap();
    ConfigStore::authority(
        ConfigOptions::new(defaults()),
        StorageTiers::local_only(Arc::new(storage)),
        Arc::new(hub.endpoint(ContextRole::Authority).unwrap()),
    )
    .unwrap()
}

/// Values written before a restart are loaded after it
#[tokio::test]
async fn test_values_survive_restart() {
    let dir = TempDir::new().unwrap();

    {
        let hub = MessageHub::new();
        let store = redb_authority(&hub, &dir);
        store.ready().await.unwrap();
        store.set("fontSize", json!(16)).await.unwrap();
        store.shutdown();
    }

    let hub = MessageHub::new();
    let store = redb_authority(&hub, &dir);
    store.ready().await.unwrap();
    assert_eq!(store.get("fontSize"), Some(json!(16)));
    assert_eq!(store.get("theme"), Some(json!("light")));
}

/// The lock set persists across restarts
#[tokio::test]
async fn test_lock_set_survives_restart() {
    let dir = TempDir::new().unwrap();

    {
        let hub = MessageHub::new();
        let store = redb_authority(&hub, &dir);
        store.ready().await.unwrap();
        store.lock("theme").await.unwrap();
        store.shutdown();
    }

    let hub = MessageHub::new();
    let store = redb_authority(&hub, &dir);
    store.ready().await.unwrap();
    assert!(store.is_locked("theme"));
    assert!(!store.is_locked("fontSize"));
}

/// Remote-synced values apply after bootstrap as ordinary writes
#[tokio::test]
async fn test_synced_values_apply_after_bootstrap() {
    let hub = MessageHub::new();
    let local = MemoryStorage::new();
    let synced = MemoryStorage::with_values(BTreeMap::from([(
        "theme".to_string(),
        json!("solar"),
    )]));

    let store = ConfigStore::authority(
        ConfigOptions::new(defaults()).with_sync_keys(["theme"]),
        StorageTiers::local_only(Arc::new(local.clone())).with_synced(Arc::new(synced)),
        Arc::new(hub.endpoint(ContextRole::Authority).unwrap()),
    )
    .unwrap();
    store.ready().await.unwrap();

    wait_until(|| store.get("theme") == Some(json!("solar"))).await;

    // Applied as an ordinary write: it also lands in local storage
    let persisted = local.get(&["theme".to_string()]).await.unwrap();
    assert_eq!(persisted.get("theme"), Some(&json!("solar")));
}

/// Sync-key writes also land in the synced tier
#[tokio::test]
async fn test_sync_key_writes_reach_synced_tier() {
    let hub = MessageHub::new();
    let synced = MemoryStorage::new();

    let store = ConfigStore::authority(
        ConfigOptions::new(defaults()).with_local_keys(["fontSize"]),
        StorageTiers::local_only(Arc::new(MemoryStorage::new()))
            .with_synced(Arc::new(synced.clone())),
        Arc::new(hub.endpoint(ContextRole::Authority).unwrap()),
    )
    .unwrap();
    store.ready().await.unwrap();

    store.set("theme", json!("dark")).await.unwrap();
    store.set("fontSize", json!(16)).await.unwrap();

    let remote = synced
        .get(&["theme".to_string(), "fontSize".to_string()])
        .await
        .unwrap();
    assert_eq!(remote.get("theme"), Some(&json!("dark")));
    // fontSize is a local key and stays off the synced tier
    assert_eq!(remote.get("fontSize"), None);
}

/// An external write to local storage is applied and observers notified
#[tokio::test]
async fn test_storage_change_event_applies() {
    let hub = MessageHub::new();
    let local = MemoryStorage::new();
    let store = ConfigStore::authority(
        ConfigOptions::new(defaults()),
        StorageTiers::local_only(Arc::new(local.clone())),
        Arc::new(hub.endpoint(ContextRole::Authority).unwrap()),
    )
    .unwrap();
    store.ready().await.unwrap();

    let keys = Arc::new(Mutex::new(Vec::new()));
    let sink = keys.clone();
    store.add_observer(Observer::callback(move |key| {
        sink.lock().push(key.to_string())
    }));

    local.push(BTreeMap::from([("fontSize".to_string(), json!(20))]));

    wait_until(|| store.get("fontSize") == Some(json!(20))).await;
    assert_eq!(*keys.lock(), vec!["fontSize"]);
}

/// A managed-tier change applies the new value and re-asserts the lock
#[tokio::test]
async fn test_managed_change_relocks_key() {
    let hub = MessageHub::new();
    let managed = MemoryStorage::read_only(BTreeMap::new());
    let store = ConfigStore::authority(
        ConfigOptions::new(defaults()),
        StorageTiers::local_only(Arc::new(MemoryStorage::new()))
            .with_managed(Arc::new(managed.clone())),
        Arc::new(hub.endpoint(ContextRole::Authority).unwrap()),
    )
    .unwrap();
    store.ready().await.unwrap();
    assert!(!store.is_locked("theme"));

    managed.push(BTreeMap::from([("theme".to_string(), json!("dark"))]));

    wait_until(|| store.get("theme") == Some(json!("dark"))).await;
    assert!(store.is_locked("theme"));
}
