//! In-process message hub
//!
//! Connects the contexts of a single process: each context registers an
//! endpoint, at most one of them as the authoritative endpoint. Requests
//! route to the authority; broadcasts fan out to every other endpoint.
//! Stands in for the host's messaging bridge in tests and single-process
//! deployments.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::protocol::{ConfigBroadcast, ConfigRequest, ConfigResponse};
use super::transport::{Inbound, Transport};
use crate::error::{ConfigError, ConfigResult};
use crate::types::ContextRole;

struct HubInner {
    authority: Mutex<Option<(u64, mpsc::UnboundedSender<Inbound>)>>,
    peers: Mutex<Vec<(u64, mpsc::UnboundedSender<Inbound>)>>,
    next_id: Mutex<u64>,
}

/// In-process hub connecting the contexts of one process
#[derive(Clone)]
pub struct MessageHub {
    inner: Arc<HubInner>,
}

impl MessageHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                authority: Mutex::new(None),
                peers: Mutex::new(Vec::new()),
                next_id: Mutex::new(0),
            }),
        }
    }

    /// Register a new endpoint with the given role
    ///
    /// At most one authoritative endpoint may be registered at a time;
    /// registering a second is an invalid operation while the first is
    /// still connected.
    pub fn endpoint(&self, role: ContextRole) -> ConfigResult<HubEndpoint> {
        let id = {
            let mut next = self.inner.next_id.lock();
            *next += 1;
            *next
        };
        let (tx, rx) = mpsc::unbounded_channel();

        if role == ContextRole::Authority {
            let mut authority = self.inner.authority.lock();
            if let Some((_, existing)) = authority.as_ref() {
                if !existing.is_closed() {
                    return Err(ConfigError::InvalidOperation(
                        "an authoritative endpoint is already registered".to_string(),
                    ));
                }
            }
            *authority = Some((id, tx.clone()));
        }
        self.inner.peers.lock().push((id, tx));

        debug!(id, %role, "hub endpoint registered");
        Ok(HubEndpoint {
            id,
            inner: self.inner.clone(),
            incoming: Mutex::new(Some(rx)),
        })
    }
}

impl Default for MessageHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One context's connection to a [`MessageHub`]
pub struct HubEndpoint {
    id: u64,
    inner: Arc<HubInner>,
    incoming: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
}

#[async_trait]
impl Transport for HubEndpoint {
    async fn request(&self, request: ConfigRequest) -> ConfigResult<ConfigResponse> {
        let authority = {
            let slot = self.inner.authority.lock();
            match slot.as_ref() {
                Some((_, tx)) if !tx.is_closed() => tx.clone(),
                _ => return Err(ConfigError::AuthorityUnreachable),
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        authority
            .send(Inbound::Request {
                request,
                reply: reply_tx,
            })
            .map_err(|_| ConfigError::AuthorityUnreachable)?;

        reply_rx
            .await
            .map_err(|_| ConfigError::Transport("authority dropped the request".to_string()))
    }

    async fn broadcast(&self, message: ConfigBroadcast) -> ConfigResult<()> {
        let mut peers = self.inner.peers.lock();
        peers.retain(|(id, tx)| {
            if *id == self.id {
                return true;
            }
            tx.send(Inbound::Broadcast(message.clone())).is_ok()
        });
        Ok(())
    }

    fn take_incoming(&self) -> ConfigResult<mpsc::UnboundedReceiver<Inbound>> {
        self.incoming.lock().take().ok_or_else(|| {
            ConfigError::InvalidOperation("inbound stream already claimed".to_string())
        })
    }
}
