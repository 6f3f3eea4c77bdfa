//! In-memory value store with lock tracking
//!
//! Holds the current value for every known key plus the lock set. All
//! mutation goes through [`ValueStore::apply`], which enforces the
//! deep-equality guard: re-applying the current value reports no change, so
//! idempotent writes never fan out notifications or propagation messages.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::types::ConfigSnapshot;

/// In-memory state of one configuration namespace
pub(crate) struct ValueStore {
    defaults: BTreeMap<String, Value>,
    values: BTreeMap<String, Value>,
    locked: BTreeSet<String>,
    /// Administratively sourced locks, re-derived on every load
    managed: BTreeSet<String>,
}

impl ValueStore {
    /// Create a store with every key at its default value
    pub fn new(defaults: BTreeMap<String, Value>) -> Self {
        let values = defaults.clone();
        Self {
            defaults,
            values,
            locked: BTreeSet::new(),
            managed: BTreeSet::new(),
        }
    }

    /// Whether `key` is part of the default mapping
    pub fn known(&self, key: &str) -> bool {
        self.defaults.contains_key(key)
    }

    /// Current value for `key`, if known
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Apply a value, returning whether anything changed
    ///
    /// Unknown keys and deep-equal values report `false`. Lock state is not
    /// consulted here; callers gate locked writes before applying.
    pub fn apply(&mut self, key: &str, value: Value) -> bool {
        if !self.known(key) {
            return false;
        }
        if self.values.get(key) == Some(&value) {
            return false;
        }
        self.values.insert(key.to_string(), value);
        true
    }

    /// Whether `key` is currently locked
    pub fn is_locked(&self, key: &str) -> bool {
        self.locked.contains(key)
    }

    /// Whether `key` carries an administrative (managed-storage) lock
    pub fn is_managed(&self, key: &str) -> bool {
        self.managed.contains(key)
    }

    /// Set lock state, returning whether it changed
    ///
    /// Unlocking also drops the administrative marker; a key only counts as
    /// managed while its managed-sourced lock stands, and the marker is
    /// re-derived from managed storage on the next load anyway.
    pub fn set_locked(&mut self, key: &str, locked: bool) -> bool {
        if !self.known(key) {
            return false;
        }
        if locked {
            self.locked.insert(key.to_string())
        } else {
            self.managed.remove(key);
            self.locked.remove(key)
        }
    }

    /// Record an administrative lock for `key`
    ///
    /// Returns whether the lock state changed (the managed marker alone does
    /// not notify observers).
    pub fn mark_managed(&mut self, key: &str) -> bool {
        if !self.known(key) {
            return false;
        }
        self.managed.insert(key.to_string());
        self.locked.insert(key.to_string())
    }

    /// Currently locked keys
    pub fn locked_keys(&self) -> BTreeSet<String> {
        self.locked.clone()
    }

    /// Full snapshot of values and lock state
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            values: self.values.clone(),
            locked_keys: self.locked.clone(),
        }
    }

    /// Restore every key to its default value, ignoring locks
    ///
    /// Returns every known key; reset notifies per key even when the value
    /// was already at its default. Lock state is preserved.
    pub fn reset(&mut self) -> Vec<String> {
        self.values = self.defaults.clone();
        self.defaults.keys().cloned().collect()
    }
}
