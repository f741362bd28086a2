//! The Handler Link: keeps one [`crate::class::DeviceClass`]
//! subscribed to its external handler's endpoint, reconnecting when the
//! handler disappears and reappears.

use tracing::{info, instrument, warn};

use crate::error::{TransportFault, UbusDevError};
use crate::transport::{PeerId, RpcTransport};

/// `Unresolved -> Resolving -> Subscribed <-> Waiting`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LinkState {
    Unresolved,
    Resolving,
    Subscribed,
    Waiting,
}

/// One class's subscription to its handler endpoint.
pub struct HandlerLink {
    endpoint: String,
    state: LinkState,
    peer: Option<PeerId>,
}

impl HandlerLink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            state: LinkState::Unresolved,
            peer: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_subscribed(&self) -> bool {
        matches!(self.state, LinkState::Subscribed)
    }

    pub fn peer(&self) -> Option<&PeerId> {
        self.peer.as_ref()
    }

    /// Resolves the endpoint name and subscribes. On failure the link
    /// settles into `Waiting` so a later object-added event can retry.
    #[instrument(skip(self, transport), fields(endpoint = %self.endpoint))]
    pub async fn subscribe(&mut self, transport: &dyn RpcTransport) -> Result<(), UbusDevError> {
        self.state = LinkState::Resolving;
        let peer = match transport.resolve(&self.endpoint).await {
            Ok(peer) => peer,
            Err(TransportFault::UnknownEndpoint(name)) => {
                self.state = LinkState::Waiting;
                warn!(endpoint = %self.endpoint, "handler endpoint not yet present");
                return Err(UbusDevError::HandlerAbsent { endpoint: name });
            }
            Err(source) => {
                self.state = LinkState::Waiting;
                return Err(UbusDevError::TransportError {
                    endpoint: self.endpoint.clone(),
                    method: "resolve".to_string(),
                    source,
                });
            }
        };

        match transport.subscribe(&peer, &self.endpoint).await {
            Ok(()) => {
                self.peer = Some(peer);
                self.state = LinkState::Subscribed;
                info!(endpoint = %self.endpoint, "subscribed to handler");
                Ok(())
            }
            Err(source) => {
                self.state = LinkState::Waiting;
                Err(UbusDevError::TransportError {
                    endpoint: self.endpoint.clone(),
                    method: "subscribe".to_string(),
                    source,
                })
            }
        }
    }

    /// The transport reported the subscription lost; transitions
    /// `Subscribed -> Waiting`. A no-op from any other state.
    pub fn on_subscription_removed(&mut self) {
        if matches!(self.state, LinkState::Subscribed) {
            warn!(endpoint = %self.endpoint, "subscription lost, waiting for handler to reappear");
            self.state = LinkState::Waiting;
            self.peer = None;
        }
    }

    /// An `object-added` event named this link's endpoint. Idempotent:
    /// repeated events while already resolving/subscribed collapse into a
    /// single attempt.
    #[instrument(skip(self, transport), fields(endpoint = %self.endpoint))]
    pub async fn on_object_added(&mut self, transport: &dyn RpcTransport) -> Result<(), UbusDevError> {
        if !matches!(self.state, LinkState::Waiting) {
            return Ok(());
        }
        self.subscribe(transport).await
    }
}
