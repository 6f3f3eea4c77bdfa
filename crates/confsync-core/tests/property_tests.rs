//! Property-based tests for protocol encoding, option derivation, and
//! replication semantics (last-write-wins convergence, deep-equal no-ops)

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use confsync_core::{
    ConfigBroadcast, ConfigOptions, ConfigRequest, ConfigStore, ContextRole, MemoryStorage,
    MessageHub, Observer, PeerMessage, StorageTiers, WireMessage,
};
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// Strategy Generators
// ============================================================================

/// Generate configuration keys
fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_.]{0,30}").expect("valid regex")
}

/// Generate arbitrary JSON values, nested up to two levels
fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,40}".prop_map(Value::from),
    ];
    leaf.prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map(key_strategy(), inner, 0..4)
                .prop_map(|m| json!(m)),
        ]
    })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Any update request survives the wire encoding unchanged
    #[test]
    fn update_request_roundtrip(key in key_strategy(), value in value_strategy(), locked in prop::option::of(any::<bool>())) {
        let wire = WireMessage::new(PeerMessage::Request(ConfigRequest::Update {
            key: key.clone(),
            value: value.clone(),
            locked,
        }));

        let decoded = WireMessage::decode(&wire.encode().unwrap()).unwrap();
        match decoded.into_inner() {
            PeerMessage::Request(ConfigRequest::Update { key: k, value: v, locked: l }) => {
                prop_assert_eq!(k, key);
                prop_assert_eq!(v, value);
                prop_assert_eq!(l, locked);
            }
            other => prop_assert!(false, "wrong message: {:?}", other),
        }
    }

    /// Any broadcast survives the wire encoding unchanged
    #[test]
    fn updated_broadcast_roundtrip(key in key_strategy(), value in value_strategy()) {
        let wire = WireMessage::new(PeerMessage::Broadcast(ConfigBroadcast::Updated {
            key: key.clone(),
            value: value.clone(),
            locked: false,
        }));

        let decoded = WireMessage::decode(&wire.encode().unwrap()).unwrap();
        match decoded.into_inner() {
            PeerMessage::Broadcast(ConfigBroadcast::Updated { key: k, value: v, .. }) => {
                prop_assert_eq!(k, key);
                prop_assert_eq!(v, value);
            }
            other => prop_assert!(false, "wrong message: {:?}", other),
        }
    }

    /// local_keys and sync_keys partition the default mapping
    #[test]
    fn local_keys_complement_defaults(
        entries in prop::collection::btree_map(key_strategy(), value_strategy(), 1..12),
        picks in prop::collection::vec(any::<bool>(), 12),
    ) {
        let defaults: BTreeMap<String, Value> = entries;
        let local: Vec<String> = defaults
            .keys()
            .zip(picks.iter())
            .filter(|(_, pick)| **pick)
            .map(|(k, _)| k.clone())
            .collect();

        let opts = ConfigOptions::new(defaults.clone()).with_local_keys(local.clone());
        let sync = opts.sync_key_set().unwrap();

        for key in defaults.keys() {
            let is_local = local.contains(key);
            prop_assert_eq!(sync.contains(key), !is_local);
        }
    }
}

// ============================================================================
// Replication Properties
// ============================================================================

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn payload_authority(hub: &MessageHub) -> ConfigStore {
    ConfigStore::authority(
        ConfigOptions::new(BTreeMap::from([("payload".to_string(), json!(null))])),
        StorageTiers::local_only(Arc::new(MemoryStorage::new())),
        Arc::new(hub.endpoint(ContextRole::Authority).unwrap()),
    )
    .unwrap()
}

fn payload_replica(hub: &MessageHub) -> ConfigStore {
    ConfigStore::replica(
        ConfigOptions::new(BTreeMap::from([("payload".to_string(), json!(null))])),
        Arc::new(hub.endpoint(ContextRole::Replica).unwrap()),
    )
    .unwrap()
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

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Writes alternating between two replicas converge every context on the
    /// value the authority applied last
    #[test]
    fn interleaved_writes_converge_last_write_wins(values in prop::collection::vec(value_strategy(), 1..6)) {
        runtime().block_on(async move {
            let hub = MessageHub::new();
            let auth = payload_authority(&hub);
            auth.ready().await.unwrap();
            let rep1 = payload_replica(&hub);
            rep1.ready().await.unwrap();
            let rep2 = payload_replica(&hub);
            rep2.ready().await.unwrap();

            for (i, value) in values.iter().enumerate() {
                let writer = if i % 2 == 0 { &rep1 } else { &rep2 };
                writer.set("payload", value.clone()).await.unwrap();
                // The ack means the authority has applied; wait for the
                // broadcast to land everywhere before the next writer acts
                let canonical = auth.get("payload");
                wait_until(|| {
                    rep1.get("payload") == canonical && rep2.get("payload") == canonical
                })
                .await;
            }

            let last = values.last().cloned();
            assert_eq!(auth.get("payload"), last);
            assert_eq!(rep1.get("payload"), last);
            assert_eq!(rep2.get("payload"), last);
        });
    }

    /// Observers fire exactly once per write that actually changes the value;
    /// deep-equal rewrites are silent
    #[test]
    fn deep_equal_writes_never_notify(values in prop::collection::vec(value_strategy(), 1..8)) {
        runtime().block_on(async move {
            let hub = MessageHub::new();
            let auth = payload_authority(&hub);
            auth.ready().await.unwrap();

            let notifications = Arc::new(AtomicUsize::new(0));
            let sink = notifications.clone();
            auth.add_observer(Observer::callback(move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            }));

            let mut current = json!(null);
            let mut expected = 0;
            for value in values {
                auth.set("payload", value.clone()).await.unwrap();
                if value != current {
                    expected += 1;
                    current = value;
                }
            }
            assert_eq!(notifications.load(Ordering::SeqCst), expected);
        });
    }
}
