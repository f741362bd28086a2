//! The RPC transport narrow interface. The core only ever talks to transports
//! through [`RpcTransport`]; this module also carries an in-process fake
//! implementation used by the integration tests and the demo harness binary
//! in place of a live ubus bus.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::TransportFault;

/// A resolved peer identifier (an opaque ubus object id, in spirit).
pub type PeerId = String;

/// Marker returned by a successfully dispatched fire-and-forget RPC.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Dispatched;

/// Narrow RPC-transport interface the core consumes.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Resolves an endpoint name (e.g. `network.device.ubus.h`) to a peer id.
    async fn resolve(&self, endpoint: &str) -> Result<PeerId, TransportFault>;

    /// Subscribes to the peer's notification stream.
    async fn subscribe(&self, peer: &PeerId, endpoint: &str) -> Result<(), TransportFault>;

    /// Issues a fire-and-forget RPC; the reply status, if any, surfaces
    /// later as a log line only — non-zero statuses never drive state
    /// transitions by themselves).
    async fn invoke_async(
        &self,
        peer: &PeerId,
        method: &str,
        args: Value,
    ) -> Result<Dispatched, TransportFault>;

    /// Issues a blocking request/reply RPC, used only by the dump paths
    /// Must not be called while holding a mutable borrow of any shadow.
    async fn invoke_sync(
        &self,
        peer: &PeerId,
        method: &str,
        args: Value,
    ) -> Result<Value, TransportFault>;
}

/// One inbound event the transport can push toward the plug-in's event
/// loop: a handler notification, a subscription loss, or the handler's
/// object reappearing.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Notification {
        endpoint: String,
        notify_type: String,
        payload: Value,
    },
    SubscriptionRemoved {
        endpoint: String,
    },
    ObjectAdded {
        endpoint: String,
    },
}

/// An in-process fake transport: no real bus, just a call log and a queue
/// of events a test (or the harness binary) pushes to simulate the handler.
/// A deterministic stand-in driven entirely by fixtures instead of live I/O.
pub struct FakeTransport {
    endpoints: Mutex<VecDeque<(String, PeerId)>>,
    calls: Mutex<Vec<RecordedCall>>,
    events: AsyncMutex<VecDeque<TransportEvent>>,
    reject_invoke: Mutex<bool>,
}

/// One recorded outbound RPC, inspectable by tests.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RecordedCall {
    pub peer: PeerId,
    pub method: String,
    pub args: Value,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            events: AsyncMutex::new(VecDeque::new()),
            reject_invoke: Mutex::new(false),
        }
    }

    /// Publishes an endpoint so a subsequent `resolve` succeeds.
    pub fn publish_endpoint(&self, endpoint: &str, peer: &str) {
        self.endpoints
            .lock()
            .unwrap()
            .push_back((endpoint.to_string(), peer.to_string()));
    }

    /// Removes a previously published endpoint, simulating the handler
    /// process disappearing.
    pub fn unpublish_endpoint(&self, endpoint: &str) {
        self.endpoints
            .lock()
            .unwrap()
            .retain(|(name, _)| name != endpoint);
    }

    /// Queues an event for the plug-in's event loop to pick up on its next
    /// poll (see [`FakeTransport::next_event`]).
    pub async fn push_event(&self, event: TransportEvent) {
        self.events.lock().await.push_back(event);
    }

    /// Pops the next queued event, if any.
    pub async fn next_event(&self) -> Option<TransportEvent> {
        self.events.lock().await.pop_front()
    }

    /// Returns the outbound RPC calls recorded so far, in issue order.
    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Forces every subsequent `invoke_async`/`invoke_sync` to fail, to
    /// exercise the `TransportError` retry path.
    pub fn set_reject_invoke(&self, reject: bool) {
        *self.reject_invoke.lock().unwrap() = reject;
    }

    fn find_peer(&self, endpoint: &str) -> Option<PeerId> {
        self.endpoints
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| name == endpoint)
            .map(|(_, peer)| peer.clone())
    }
}

#[async_trait]
impl RpcTransport for FakeTransport {
    async fn resolve(&self, endpoint: &str) -> Result<PeerId, TransportFault> {
        self.find_peer(endpoint)
            .ok_or_else(|| TransportFault::UnknownEndpoint(endpoint.to_string()))
    }

    async fn subscribe(&self, _peer: &PeerId, endpoint: &str) -> Result<(), TransportFault> {
        if self.find_peer(endpoint).is_some() {
            Ok(())
        } else {
            Err(TransportFault::UnknownEndpoint(endpoint.to_string()))
        }
    }

    async fn invoke_async(
        &self,
        peer: &PeerId,
        method: &str,
        args: Value,
    ) -> Result<Dispatched, TransportFault> {
        if *self.reject_invoke.lock().unwrap() {
            return Err(TransportFault::Rejected);
        }
        self.calls.lock().unwrap().push(RecordedCall {
            peer: peer.clone(),
            method: method.to_string(),
            args,
        });
        Ok(Dispatched)
    }

    async fn invoke_sync(
        &self,
        peer: &PeerId,
        method: &str,
        args: Value,
    ) -> Result<Value, TransportFault> {
        if *self.reject_invoke.lock().unwrap() {
            return Err(TransportFault::Rejected);
        }
        self.calls.lock().unwrap().push(RecordedCall {
            peer: peer.clone(),
            method: method.to_string(),
            args,
        });
        Ok(Value::Object(serde_json::Map::new()))
    }
}
