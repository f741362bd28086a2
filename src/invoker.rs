//! The Invoker: issues RPCs on behalf of a shadow and turns
//! transport faults into the crate's typed error taxonomy, logging as it
//! goes. Completion is just "the `await` resolved": there is a single
//! `Result` rather than separate data/completion callbacks, and non-zero
//! completion statuses are represented as `Err` the caller logs and
//! otherwise ignores for state-machine purposes.

use serde_json::Value;
use tracing::{error, instrument};

use crate::error::{TransportFault, UbusDevError};
use crate::transport::{Dispatched, PeerId, RpcTransport};

/// A small opaque correlator attached to outbound calls for log
/// correlation; carries no transport meaning.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display)]
#[display("{_0}")]
pub struct Cookie(pub u64);

/// Issues RPCs through an [`RpcTransport`], applying the logging and
/// error-wrapping policy common to every call site across the shadows and
/// the adapter surface.
pub struct Invoker<'t> {
    transport: &'t dyn RpcTransport,
}

impl<'t> Invoker<'t> {
    pub fn new(transport: &'t dyn RpcTransport) -> Self {
        Self { transport }
    }

    /// Fire-and-forget RPC (`invoke_async`).
    #[instrument(skip(self, args), fields(method, endpoint, cookie = %cookie))]
    pub async fn invoke_async(
        &self,
        endpoint: &str,
        peer: &PeerId,
        method: &str,
        args: Value,
        cookie: Cookie,
    ) -> Result<Dispatched, UbusDevError> {
        self.transport
            .invoke_async(peer, method, args)
            .await
            .map_err(|source| {
                error!(endpoint, method, cookie = %cookie, error = %source, "RPC dispatch failed");
                UbusDevError::TransportError {
                    endpoint: endpoint.to_string(),
                    method: method.to_string(),
                    source,
                }
            })
    }

    /// Blocking request/reply RPC, used only by the dump paths.
    #[instrument(skip(self, args), fields(method, endpoint))]
    pub async fn invoke_sync(
        &self,
        endpoint: &str,
        peer: &PeerId,
        method: &str,
        args: Value,
    ) -> Result<Value, UbusDevError> {
        self.transport
            .invoke_sync(peer, method, args)
            .await
            .map_err(|source| {
                error!(endpoint, method, error = %source, "synchronous RPC failed");
                UbusDevError::TransportError {
                    endpoint: endpoint.to_string(),
                    method: method.to_string(),
                    source,
                }
            })
    }
}

impl From<TransportFault> for UbusDevError {
    fn from(source: TransportFault) -> Self {
        UbusDevError::TransportError {
            endpoint: String::new(),
            method: String::new(),
            source,
        }
    }
}
