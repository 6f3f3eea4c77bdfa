//! Replication protocol messages
//!
//! Every cross-context exchange is one of three closed unions dispatched by
//! exhaustive `match`: requests travel point-to-point to the authoritative
//! context, responses come back on the same channel, and broadcasts fan out
//! to every peer context.
//!
//! ## Message flow
//!
//! ```text
//! Replica                           Authority
//!   |                                  |
//!   |--- Load ------------------------>|
//!   |<-- Snapshot {values, locked} ----|
//!   |                                  |
//!   |--- Update {key, value, locked} ->|
//!   |<-- Ack --------------------------|   (state not yet applied locally)
//!   |                                  |
//!   |<== Updated {key, value, locked} =|   (broadcast: now applied)
//! ```
//!
//! A replica applies a mutation only when the corresponding broadcast
//! arrives, never from the direct response, so the authority remains the
//! single point of canonical application.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Point-to-point request to the authoritative context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConfigRequest {
    /// Request the full current snapshot
    Load,
    /// Request the current lock set
    LockedKeys,
    /// Apply a value and/or lock-state change
    Update {
        /// The key to update
        key: String,
        /// New value for the key
        value: Value,
        /// Desired lock state; `None` leaves the lock state untouched, so a
        /// plain value write cannot clear a lock it has not yet seen
        locked: Option<bool>,
    },
    /// Restore every key to its default value
    Reset,
}

/// Response from the authoritative context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConfigResponse {
    /// Full current state, answering [`ConfigRequest::Load`]
    Snapshot {
        /// Current value for every known key
        values: BTreeMap<String, Value>,
        /// Currently locked keys
        locked_keys: BTreeSet<String>,
    },
    /// Current lock set, answering [`ConfigRequest::LockedKeys`]
    LockedKeys {
        /// Currently locked keys
        locked_keys: BTreeSet<String>,
    },
    /// Acknowledgment of an applied mutation
    Ack,
}

/// Fire-and-forget message fanned out to every peer context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConfigBroadcast {
    /// A key's value and/or lock state changed
    Updated {
        /// The key that changed
        key: String,
        /// Canonical value after the change
        value: Value,
        /// Canonical lock state after the change
        locked: bool,
    },
    /// Every key was restored to its default value
    Reseted,
}

/// Any protocol message, for byte-oriented transports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerMessage {
    /// A request to the authority
    Request(ConfigRequest),
    /// A response from the authority
    Response(ConfigResponse),
    /// A broadcast to all peers
    Broadcast(ConfigBroadcast),
}

/// Versioned wrapper for wire encoding
///
/// New protocol versions become new variants without breaking old peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    /// Protocol version 1
    V1(PeerMessage),
}

impl WireMessage {
    /// Wrap a message at the current protocol version
    pub fn new(message: PeerMessage) -> Self {
        WireMessage::V1(message)
    }

    /// Encode to bytes
    pub fn encode(&self) -> Result<Vec<u8>, ConfigError> {
        serde_json::to_vec(self).map_err(|e| ConfigError::Serialization(e.to_string()))
    }

    /// Decode from bytes
    ///
    /// Receivers ignore messages that fail to decode (malformed-message
    /// handling); the error carries the reason for the debug log.
    pub fn decode(data: &[u8]) -> Result<Self, ConfigError> {
        serde_json::from_slice(data).map_err(|e| ConfigError::Serialization(e.to_string()))
    }

    /// Unwrap the inner message
    pub fn into_inner(self) -> PeerMessage {
        match self {
            WireMessage::V1(message) => message,
        }
    }

    /// Protocol version of this message
    pub fn version(&self) -> u8 {
        match self {
            WireMessage::V1(_) => 1,
        }
    }
}
