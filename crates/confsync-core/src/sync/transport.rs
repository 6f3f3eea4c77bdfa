//! Transport adapter trait
//!
//! A host bridge implements [`Transport`] to connect one context to its
//! peers: point-to-point request/response against the single authoritative
//! endpoint, fire-and-forget broadcast to all peer contexts, and an inbound
//! stream of traffic addressed to this context.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::protocol::{ConfigBroadcast, ConfigRequest, ConfigResponse};
use crate::error::ConfigResult;

/// Traffic addressed to one context
#[derive(Debug)]
pub enum Inbound {
    /// A request from a peer; only the authoritative context receives these
    Request {
        /// The request to handle
        request: ConfigRequest,
        /// Channel for the response; dropped if the requester went away
        reply: oneshot::Sender<ConfigResponse>,
    },
    /// A broadcast from the authoritative context
    Broadcast(ConfigBroadcast),
}

/// Messaging primitives connecting one context to its peers
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request to the authoritative endpoint and await its response
    ///
    /// Fails with [`ConfigError::AuthorityUnreachable`] when no
    /// authoritative context is currently registered; callers decide the
    /// retry policy.
    ///
    /// [`ConfigError::AuthorityUnreachable`]: crate::ConfigError::AuthorityUnreachable
    async fn request(&self, request: ConfigRequest) -> ConfigResult<ConfigResponse>;

    /// Fan a broadcast out to every reachable peer context
    ///
    /// The originator is excluded: it has already applied the change
    /// locally, and the origin tag on applied changes makes self-delivery
    /// redundant.
    async fn broadcast(&self, message: ConfigBroadcast) -> ConfigResult<()>;

    /// Claim the inbound stream for this context
    ///
    /// Succeeds exactly once; the store claims it during load. A second
    /// claim is an invalid operation.
    fn take_incoming(&self) -> ConfigResult<mpsc::UnboundedReceiver<Inbound>>;
}
