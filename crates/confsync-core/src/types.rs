//! Core types for the replicated configuration store

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};

/// Role of an execution context within a configuration namespace
///
/// Exactly one context per namespace is authoritative: it owns persistence
/// and originates all broadcasts. Every other context is a replica that
/// forwards mutations to the authority and applies broadcasts it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRole {
    /// Writes persistence and originates broadcasts
    Authority,
    /// Forwards mutations to the authority, applies broadcasts
    Replica,
}

impl fmt::Display for ContextRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextRole::Authority => write!(f, "authority"),
            ContextRole::Replica => write!(f, "replica"),
        }
    }
}

/// Full state of a configuration namespace at a point in time
///
/// Returned by `ConfigStore::load()` and sent as the response to a `Load`
/// request from a replica.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Current value for every known key
    pub values: BTreeMap<String, Value>,
    /// Keys currently locked against mutation
    pub locked_keys: BTreeSet<String>,
}

/// Construction-time options for a configuration store
///
/// `defaults` fixes the set of valid keys; no key outside it is ever
/// introduced. `sync_keys` and `local_keys` are alternative ways to choose
/// the subset replicated to the remote-synced storage tier; supplying both
/// is an error.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    /// Default value for every known key (required)
    pub defaults: BTreeMap<String, Value>,
    /// Keys replicated to the remote-synced storage tier
    pub sync_keys: Option<BTreeSet<String>>,
    /// Keys kept device-local; the complement within `defaults` is synced
    pub local_keys: Option<BTreeSet<String>>,
    /// Emit per-operation debug logs
    pub verbose: bool,
}

impl ConfigOptions {
    /// Create options with the given default mapping
    pub fn new(defaults: BTreeMap<String, Value>) -> Self {
        Self {
            defaults,
            ..Default::default()
        }
    }

    /// Designate the keys replicated to remote-synced storage
    pub fn with_sync_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sync_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Designate device-local keys; everything else is synced
    pub fn with_local_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.local_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Enable per-operation debug logging
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// Derive the set of keys replicated remotely
    ///
    /// Returns an empty set when neither `sync_keys` nor `local_keys` is
    /// given (no cross-device replication).
    pub fn sync_key_set(&self) -> ConfigResult<BTreeSet<String>> {
        match (&self.sync_keys, &self.local_keys) {
            (Some(_), Some(_)) => Err(ConfigError::InvalidOptions(
                "sync_keys and local_keys are mutually exclusive".to_string(),
            )),
            (Some(sync), None) => {
                if let Some(unknown) = sync.iter().find(|k| !self.defaults.contains_key(*k)) {
                    return Err(ConfigError::InvalidOptions(format!(
                        "sync key {unknown} is not in the default mapping"
                    )));
                }
                Ok(sync.clone())
            }
            (None, Some(local)) => Ok(self
                .defaults
                .keys()
                .filter(|k| !local.contains(*k))
                .cloned()
                .collect()),
            (None, None) => Ok(BTreeSet::new()),
        }
    }
}
