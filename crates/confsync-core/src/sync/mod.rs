//! Replication protocol and transport for the configuration store
//!
//! - [`protocol`]: the closed message unions exchanged between contexts,
//!   plus the versioned wire encoding
//! - [`transport`]: the [`Transport`] trait a host bridge implements
//! - [`hub`]: an in-process [`MessageHub`] connecting contexts in one
//!   process, used by tests and single-process hosts

pub mod hub;
pub mod protocol;
pub mod transport;

pub use hub::{HubEndpoint, MessageHub};
pub use protocol::{ConfigBroadcast, ConfigRequest, ConfigResponse, PeerMessage, WireMessage};
pub use transport::{Inbound, Transport};
