//! Main ConfigStore - the entry point for a replicated configuration namespace
//!
//! One `ConfigStore` lives in each execution context. The authoritative
//! context owns persistence and originates every broadcast; replica contexts
//! forward mutations to the authority and apply the broadcasts that come
//! back. Within one context the store coordinates the in-memory value store,
//! the observer registry, the storage tiers, and the transport.
//!
//! # Example
//!
//! ```ignore
//! use confsync_core::{ConfigOptions, ConfigStore, MessageHub, MemoryStorage, StorageTiers};
//!
//! let hub = MessageHub::new();
//! let store = ConfigStore::authority(
//!     ConfigOptions::new(defaults),
//!     StorageTiers::local_only(Arc::new(MemoryStorage::new())),
//!     Arc::new(hub.endpoint(ContextRole::Authority)?),
//! )?;
//! store.ready().await?;
//!
//! store.set("fontSize", 16).await?;
//! assert_eq!(store.get("fontSize"), Some(16.into()));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::observer::{Observer, ObserverRegistry};
use crate::storage::{StorageChange, StorageTier, StorageTiers, LOCKED_KEYS_ENTRY};
use crate::store::ValueStore;
use crate::sync::protocol::{ConfigBroadcast, ConfigRequest, ConfigResponse};
use crate::sync::transport::{Inbound, Transport};
use crate::types::{ConfigOptions, ConfigSnapshot, ContextRole};

/// First delay before retrying a load request to an unreachable authority
const LOAD_RETRY_INITIAL: Duration = Duration::from_millis(250);
/// Upper bound on the exponential retry delay
const LOAD_RETRY_MAX: Duration = Duration::from_secs(4);
/// Retry budget before a replica load fails with `AuthorityUnreachable`
const LOAD_RETRY_ATTEMPTS: u32 = 8;

/// State shared between the store handle and its background listener tasks
struct Shared {
    defaults: BTreeMap<String, Value>,
    sync_keys: BTreeSet<String>,
    verbose: bool,
    role: ContextRole,
    store: Mutex<ValueStore>,
    observers: ObserverRegistry,
    /// Present only in the authoritative context
    storage: Option<StorageTiers>,
    transport: Arc<dyn Transport>,
}

/// Replicated configuration store for one execution context
pub struct ConfigStore {
    shared: Arc<Shared>,
    /// Memoized load result; repeated loads share one outcome
    loaded: OnceCell<ConfigSnapshot>,
    /// Background listener tasks, aborted on shutdown
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConfigStore {
    /// Create the authoritative store for a namespace
    ///
    /// The authority owns the storage tiers and originates all broadcasts.
    pub fn authority(
        options: ConfigOptions,
        storage: StorageTiers,
        transport: Arc<dyn Transport>,
    ) -> ConfigResult<Self> {
        Self::build(options, ContextRole::Authority, Some(storage), transport)
    }

    /// Create a replica store for a namespace
    ///
    /// Replicas never touch storage; all mutation is forwarded to the
    /// authority over the transport.
    pub fn replica(options: ConfigOptions, transport: Arc<dyn Transport>) -> ConfigResult<Self> {
        Self::build(options, ContextRole::Replica, None, transport)
    }

    fn build(
        options: ConfigOptions,
        role: ContextRole,
        storage: Option<StorageTiers>,
        transport: Arc<dyn Transport>,
    ) -> ConfigResult<Self> {
        if options.defaults.contains_key(LOCKED_KEYS_ENTRY) {
            return Err(ConfigError::InvalidOptions(format!(
                "{LOCKED_KEYS_ENTRY} is a reserved key"
            )));
        }
        let sync_keys = options.sync_key_set()?;
        info!(%role, keys = options.defaults.len(), "creating configuration store");

        Ok(Self {
            shared: Arc::new(Shared {
                store: Mutex::new(ValueStore::new(options.defaults.clone())),
                defaults: options.defaults,
                sync_keys,
                verbose: options.verbose,
                role,
                observers: ObserverRegistry::new(),
                storage,
                transport,
            }),
            loaded: OnceCell::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Role of this context
    pub fn role(&self) -> ContextRole {
        self.shared.role
    }

    /// Load the namespace, returning the settled snapshot
    ///
    /// Idempotent: the result is memoized, so repeated calls (before or
    /// after completion) share one outcome and the storage/transport I/O
    /// runs exactly once.
    pub async fn load(&self) -> ConfigResult<ConfigSnapshot> {
        let snapshot = self
            .loaded
            .get_or_try_init(|| async {
                match self.shared.role {
                    ContextRole::Authority => self.load_authority().await,
                    ContextRole::Replica => self.load_replica().await,
                }
            })
            .await?;
        Ok(snapshot.clone())
    }

    /// Resolve once the initial load completes
    pub async fn ready(&self) -> ConfigResult<()> {
        self.load().await.map(|_| ())
    }

    /// Current value for `key`; never performs I/O
    pub fn get(&self, key: &str) -> Option<Value> {
        self.shared.store.lock().get(key).cloned()
    }

    /// Current value for `key`, deserialized into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> ConfigResult<T> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        serde_json::from_value(value).map_err(|e| ConfigError::Serialization(e.to_string()))
    }

    /// Set `key` to `value`
    ///
    /// Writes to locked keys are logged no-ops. Writing the current value
    /// again changes nothing and propagates nothing. In a replica the
    /// mutation is forwarded to the authority and applied locally when the
    /// resulting broadcast arrives.
    pub async fn set(&self, key: &str, value: impl Into<Value>) -> ConfigResult<()> {
        let value = value.into();
        match self.shared.role {
            ContextRole::Authority => self.shared.authority_set(key, value).await,
            ContextRole::Replica => self.shared.forward_set(key, value).await,
        }
    }

    /// Lock `key` against mutation through the public write path
    pub async fn lock(&self, key: &str) -> ConfigResult<()> {
        self.set_lock_state(key, true).await
    }

    /// Unlock `key`
    ///
    /// Administrative (managed-storage) locks cannot be cleared from a
    /// replica; they are re-derived on every load.
    pub async fn unlock(&self, key: &str) -> ConfigResult<()> {
        self.set_lock_state(key, false).await
    }

    async fn set_lock_state(&self, key: &str, locked: bool) -> ConfigResult<()> {
        match self.shared.role {
            ContextRole::Authority => self.shared.authority_set_locked(key, locked).await,
            ContextRole::Replica => self.shared.forward_set_locked(key, locked).await,
        }
    }

    /// Restore every key to its default value
    ///
    /// Bypasses lock checks; lock state itself is preserved. Fires one
    /// notification per key and propagates like individual writes.
    pub async fn reset(&self) -> ConfigResult<()> {
        match self.shared.role {
            ContextRole::Authority => {
                self.shared.reset_authoritative().await;
                Ok(())
            }
            ContextRole::Replica => self.shared.forward_reset().await,
        }
    }

    /// Whether `key` is currently locked
    pub fn is_locked(&self, key: &str) -> bool {
        self.shared.store.lock().is_locked(key)
    }

    /// Currently locked keys
    pub fn locked_keys(&self) -> BTreeSet<String> {
        self.shared.store.lock().locked_keys()
    }

    /// Full current state of the namespace
    pub fn snapshot(&self) -> ConfigSnapshot {
        self.shared.store.lock().snapshot()
    }

    /// Register a change observer; adding a registered handle is a no-op
    pub fn add_observer(&self, observer: Observer) {
        self.shared.observers.add(observer);
    }

    /// Remove a change observer; removing an absent handle is a no-op
    pub fn remove_observer(&self, observer: &Observer) {
        self.shared.observers.remove(observer);
    }

    /// Abort the background listener tasks
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) {
        self.tasks.lock().push(tokio::spawn(future));
    }

    async fn load_authority(&self) -> ConfigResult<ConfigSnapshot> {
        let shared = &self.shared;
        let tiers = shared.storage.clone().ok_or_else(|| {
            ConfigError::LoadFailed("authoritative context requires storage".to_string())
        })?;
        info!("loading configuration (authority)");

        let keys: Vec<String> = shared.defaults.keys().cloned().collect();
        let lock_entry_key = vec![LOCKED_KEYS_ENTRY.to_string()];

        let local_fut = tiers.local.get(&keys);
        let lock_fut = tiers.local.get(&lock_entry_key);
        let managed_fut = async {
            match &tiers.managed {
                Some(managed) => Some(managed.get(&keys).await),
                None => None,
            }
        };
        let (local, locked_entry, managed) = tokio::join!(local_fut, lock_fut, managed_fut);

        let local_values = match local {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "local storage unavailable during load");
                BTreeMap::new()
            }
        };
        let restored_locks: BTreeSet<String> = match locked_entry {
            Ok(mut entry) => entry
                .remove(LOCKED_KEYS_ENTRY)
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
            Err(e) => {
                debug!(error = %e, "no persisted lock set");
                BTreeSet::new()
            }
        };
        let managed_values = match managed {
            Some(Ok(values)) => values,
            Some(Err(e)) => {
                warn!(error = %e, "managed storage unavailable during load");
                BTreeMap::new()
            }
            None => BTreeMap::new(),
        };

        // Precedence: local first, then managed on top; managed keys lock.
        let snapshot = {
            let mut store = shared.store.lock();
            for (key, value) in local_values {
                store.apply(&key, value);
            }
            for key in restored_locks {
                store.set_locked(&key, true);
            }
            for (key, value) in managed_values {
                store.apply(&key, value);
                store.mark_managed(&key);
            }
            store.snapshot()
        };

        self.start_listeners()?;

        // Lower-priority pass: synced values arrive after the primary
        // bootstrap and apply as ordinary writes, so they persist and
        // broadcast like any local change.
        if let Some(synced) = tiers.synced.clone() {
            if !shared.sync_keys.is_empty() {
                let shared = self.shared.clone();
                self.spawn(async move {
                    let keys: Vec<String> = shared.sync_keys.iter().cloned().collect();
                    match synced.get(&keys).await {
                        Ok(values) => {
                            for (key, value) in values {
                                if let Err(e) = shared.authority_set(&key, value).await {
                                    warn!(key = %key, error = %e, "failed to apply synced value");
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "synced storage unavailable during load"),
                    }
                });
            }
        }

        info!(keys = shared.defaults.len(), "configuration loaded");
        Ok(snapshot)
    }

    async fn load_replica(&self) -> ConfigResult<ConfigSnapshot> {
        let shared = &self.shared;
        info!("loading configuration (replica)");

        let mut delay = LOAD_RETRY_INITIAL;
        let mut attempt = 0u32;
        let response = loop {
            attempt += 1;
            match shared.transport.request(ConfigRequest::Load).await {
                Ok(response) => break response,
                Err(e) if attempt < LOAD_RETRY_ATTEMPTS => {
                    debug!(attempt, error = %e, "authority not reachable yet, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(LOAD_RETRY_MAX);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "giving up waiting for the authority");
                    return Err(ConfigError::AuthorityUnreachable);
                }
            }
        };

        let (values, locked_keys) = match response {
            ConfigResponse::Snapshot {
                values,
                locked_keys,
            } => (values, locked_keys),
            other => {
                return Err(ConfigError::Transport(format!(
                    "unexpected response to load: {other:?}"
                )))
            }
        };

        let snapshot = {
            let mut store = shared.store.lock();
            for (key, value) in values {
                store.apply(&key, value);
            }
            for key in locked_keys {
                store.set_locked(&key, true);
            }
            store.snapshot()
        };

        self.start_listeners()?;
        info!("configuration loaded from authority");
        Ok(snapshot)
    }

    fn start_listeners(&self) -> ConfigResult<()> {
        let inbound = self
            .shared
            .transport
            .take_incoming()
            .map_err(|e| ConfigError::LoadFailed(format!("cannot claim inbound stream: {e}")))?;
        self.spawn(run_inbound(self.shared.clone(), inbound));

        if let Some(tiers) = &self.shared.storage {
            self.spawn(run_storage_changes(
                self.shared.clone(),
                StorageTier::Local,
                tiers.local.changes(),
            ));
            if let Some(synced) = &tiers.synced {
                self.spawn(run_storage_changes(
                    self.shared.clone(),
                    StorageTier::Synced,
                    synced.changes(),
                ));
            }
            if let Some(managed) = &tiers.managed {
                self.spawn(run_storage_changes(
                    self.shared.clone(),
                    StorageTier::Managed,
                    managed.changes(),
                ));
            }
        }
        Ok(())
    }
}

impl Drop for ConfigStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Consume inbound transport traffic for one context
async fn run_inbound(shared: Arc<Shared>, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
    while let Some(message) = inbound.recv().await {
        match message {
            Inbound::Request { request, reply } => {
                let response = shared.handle_request(request).await;
                if reply.send(response).is_err() {
                    debug!("requester went away before the reply");
                }
            }
            Inbound::Broadcast(broadcast) => shared.apply_broadcast(broadcast),
        }
    }
    debug!("inbound stream closed");
}

/// Consume change notifications from one storage tier
async fn run_storage_changes(
    shared: Arc<Shared>,
    tier: StorageTier,
    mut changes: broadcast::Receiver<StorageChange>,
) {
    loop {
        match changes.recv().await {
            Ok(change) => shared.apply_storage_change(tier, change),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, ?tier, "storage change stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

impl Shared {
    fn known(&self, key: &str) -> bool {
        self.defaults.contains_key(key)
    }

    /// Authoritative write path: apply, notify, persist, broadcast
    async fn authority_set(&self, key: &str, value: Value) -> ConfigResult<()> {
        if !self.known(key) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        {
            let mut store = self.store.lock();
            if store.is_locked(key) {
                warn!(key = %key, "write to locked key ignored");
                return Ok(());
            }
            if !store.apply(key, value.clone()) {
                if self.verbose {
                    debug!(key = %key, "value unchanged, skipping propagation");
                }
                return Ok(());
            }
        }
        if self.verbose {
            debug!(key = %key, "set");
        }
        self.observers.notify(key);
        self.persist_value(key, &value).await;
        self.send_broadcast(ConfigBroadcast::Updated {
            key: key.to_string(),
            value,
            locked: false,
        })
        .await;
        Ok(())
    }

    /// Replica write path: forward to the authority and await the ack
    ///
    /// The local value is applied when the broadcast arrives, keeping the
    /// authority the single point of canonical application.
    async fn forward_set(&self, key: &str, value: Value) -> ConfigResult<()> {
        if !self.known(key) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        {
            let store = self.store.lock();
            if store.is_locked(key) {
                warn!(key = %key, "write to locked key ignored");
                return Ok(());
            }
            if store.get(key) == Some(&value) {
                return Ok(());
            }
        }
        if self.verbose {
            debug!(key = %key, "forwarding write to authority");
        }
        let response = self
            .transport
            .request(ConfigRequest::Update {
                key: key.to_string(),
                value,
                locked: None,
            })
            .await?;
        expect_ack(response)
    }

    async fn authority_set_locked(&self, key: &str, locked: bool) -> ConfigResult<()> {
        if !self.known(key) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        let (changed, value) = {
            let mut store = self.store.lock();
            let changed = store.set_locked(key, locked);
            (changed, store.get(key).cloned().unwrap_or(Value::Null))
        };
        if !changed {
            return Ok(());
        }
        info!(key = %key, locked, "lock state changed");
        self.observers.notify(key);
        self.persist_locked_set().await;
        self.send_broadcast(ConfigBroadcast::Updated {
            key: key.to_string(),
            value,
            locked,
        })
        .await;
        Ok(())
    }

    async fn forward_set_locked(&self, key: &str, locked: bool) -> ConfigResult<()> {
        if !self.known(key) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        let (value, current) = {
            let store = self.store.lock();
            (
                store.get(key).cloned().unwrap_or(Value::Null),
                store.is_locked(key),
            )
        };
        if current == locked {
            return Ok(());
        }
        let response = self
            .transport
            .request(ConfigRequest::Update {
                key: key.to_string(),
                value,
                locked: Some(locked),
            })
            .await?;
        expect_ack(response)
    }

    /// Authority-side application of an update request from a replica
    ///
    /// Only an explicit lock operation carries a desired lock state; a plain
    /// value write leaves lock state untouched, so a writer that has not yet
    /// seen a lock broadcast cannot clear the lock. The lock change applies
    /// first (refusing to clear an administrative lock), then the value under
    /// the resulting lock state.
    async fn apply_update_request(&self, key: &str, value: Value, locked: Option<bool>) {
        if !self.known(key) {
            warn!(key = %key, "update request for unknown key ignored");
            return;
        }
        let outcome = {
            let mut store = self.store.lock();
            let mut lock_changed = false;
            if let Some(locked) = locked {
                if locked != store.is_locked(key) {
                    if !locked && store.is_managed(key) {
                        warn!(key = %key, "replica may not clear an administrative lock");
                    } else {
                        store.set_locked(key, locked);
                        lock_changed = true;
                    }
                }
            }
            let value_changed = if store.is_locked(key) {
                if store.get(key) != Some(&value) {
                    warn!(key = %key, "write to locked key ignored");
                }
                false
            } else {
                store.apply(key, value)
            };
            if lock_changed || value_changed {
                Some((
                    store.get(key).cloned().unwrap_or(Value::Null),
                    store.is_locked(key),
                    value_changed,
                    lock_changed,
                ))
            } else {
                None
            }
        };

        let Some((current, now_locked, value_changed, lock_changed)) = outcome else {
            return;
        };
        self.observers.notify(key);
        if value_changed {
            self.persist_value(key, &current).await;
        }
        if lock_changed {
            self.persist_locked_set().await;
        }
        self.send_broadcast(ConfigBroadcast::Updated {
            key: key.to_string(),
            value: current,
            locked: now_locked,
        })
        .await;
    }

    /// Authoritative reset: defaults win over locks, lock state survives
    async fn reset_authoritative(&self) {
        info!("resetting configuration to defaults");
        let keys = { self.store.lock().reset() };
        for key in &keys {
            self.observers.notify(key);
        }

        if let Some(tiers) = &self.storage {
            if let Err(e) = tiers.local.set(self.defaults.clone()).await {
                warn!(error = %e, "failed to persist defaults to local storage");
            }
            if let Some(synced) = &tiers.synced {
                if !self.sync_keys.is_empty() {
                    let entries: BTreeMap<String, Value> = self
                        .defaults
                        .iter()
                        .filter(|(k, _)| self.sync_keys.contains(*k))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    if let Err(e) = synced.set(entries).await {
                        warn!(error = %e, "failed to persist defaults to synced storage");
                    }
                }
            }
        }
        self.send_broadcast(ConfigBroadcast::Reseted).await;
    }

    async fn forward_reset(&self) -> ConfigResult<()> {
        let response = self.transport.request(ConfigRequest::Reset).await?;
        expect_ack(response)
    }

    /// Persist a value to the local tier, and the synced tier for sync keys
    ///
    /// Best-effort: failures are logged and never roll back the in-memory
    /// value or block the broadcast.
    async fn persist_value(&self, key: &str, value: &Value) {
        let Some(tiers) = &self.storage else { return };
        let entries = BTreeMap::from([(key.to_string(), value.clone())]);
        if let Err(e) = tiers.local.set(entries.clone()).await {
            warn!(key = %key, error = %e, "failed to persist to local storage");
        }
        if self.sync_keys.contains(key) {
            if let Some(synced) = &tiers.synced {
                if let Err(e) = synced.set(entries).await {
                    warn!(key = %key, error = %e, "failed to persist to synced storage");
                }
            }
        }
    }

    /// Persist the lock set under its reserved local-tier entry
    async fn persist_locked_set(&self) {
        let Some(tiers) = &self.storage else { return };
        let locked = { self.store.lock().locked_keys() };
        let value = match serde_json::to_value(&locked) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "failed to serialize lock set");
                return;
            }
        };
        let entries = BTreeMap::from([(LOCKED_KEYS_ENTRY.to_string(), value)]);
        if let Err(e) = tiers.local.set(entries).await {
            warn!(error = %e, "failed to persist lock set");
        }
    }

    async fn send_broadcast(&self, message: ConfigBroadcast) {
        if let Err(e) = self.transport.broadcast(message).await {
            warn!(error = %e, "broadcast failed");
        }
    }

    /// Handle a request from a peer; only meaningful in the authority
    async fn handle_request(&self, request: ConfigRequest) -> ConfigResponse {
        if self.role != ContextRole::Authority {
            warn!(?request, "non-authoritative context received a request");
            return ConfigResponse::Ack;
        }
        match request {
            ConfigRequest::Load => {
                let snapshot = self.store.lock().snapshot();
                ConfigResponse::Snapshot {
                    values: snapshot.values,
                    locked_keys: snapshot.locked_keys,
                }
            }
            ConfigRequest::LockedKeys => ConfigResponse::LockedKeys {
                locked_keys: self.store.lock().locked_keys(),
            },
            ConfigRequest::Update { key, value, locked } => {
                self.apply_update_request(&key, value, locked).await;
                ConfigResponse::Ack
            }
            ConfigRequest::Reset => {
                self.reset_authoritative().await;
                ConfigResponse::Ack
            }
        }
    }

    /// Apply a broadcast from the authority: state only, no re-propagation
    fn apply_broadcast(&self, message: ConfigBroadcast) {
        match message {
            ConfigBroadcast::Updated { key, value, locked } => {
                if !self.known(&key) {
                    warn!(key = %key, "broadcast for unknown key ignored");
                    return;
                }
                let changed = {
                    let mut store = self.store.lock();
                    let lock_changed = store.set_locked(&key, locked);
                    let value_changed = store.apply(&key, value);
                    lock_changed || value_changed
                };
                if changed {
                    if self.verbose {
                        debug!(key = %key, "applied remote update");
                    }
                    self.observers.notify(&key);
                }
            }
            ConfigBroadcast::Reseted => {
                debug!("applying remote reset");
                let keys = { self.store.lock().reset() };
                for key in &keys {
                    self.observers.notify(key);
                }
            }
        }
    }

    /// Apply a storage-change event: state only, no re-propagation
    fn apply_storage_change(&self, tier: StorageTier, change: StorageChange) {
        let mut changed_keys = Vec::new();
        {
            let mut store = self.store.lock();
            for (key, value) in change.entries {
                if key == LOCKED_KEYS_ENTRY || !self.known(&key) {
                    continue;
                }
                let mut changed = store.apply(&key, value);
                if tier == StorageTier::Managed {
                    changed |= store.mark_managed(&key);
                }
                if changed {
                    changed_keys.push(key);
                }
            }
        }
        for key in &changed_keys {
            if self.verbose {
                debug!(key = %key, ?tier, "applied storage change");
            }
            self.observers.notify(key);
        }
    }
}

fn expect_ack(response: ConfigResponse) -> ConfigResult<()> {
    match response {
        ConfigResponse::Ack => Ok(()),
        other => Err(ConfigError::Transport(format!(
            "unexpected response: {other:?}"
        ))),
    }
}
