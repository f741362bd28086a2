use thiserror::Error;

use crate::schema::SchemaError;

/// Crate-wide error taxonomy.
///
/// `HandlerAbsent` and `NotFound` are surfaced to adapter callers; the rest
/// are logged internally and drive no further action beyond what the owning
/// shadow's retry timer already does.
#[derive(Debug, Error)]
pub enum UbusDevError {
    /// No subscription is currently held for the class's handler endpoint.
    #[error("handler for endpoint `{endpoint}` is not subscribed")]
    HandlerAbsent { endpoint: String },

    /// RPC dispatch failed at the transport layer.
    #[error("transport error dispatching `{method}` to `{endpoint}`")]
    TransportError {
        endpoint: String,
        method: String,
        #[source]
        source: TransportFault,
    },

    /// A notification payload did not match its expected shape.
    #[error("malformed notification payload for `{notify_type}`")]
    ProtocolError {
        notify_type: String,
        #[source]
        source: NotifyDecodeError,
    },

    /// A request named a device or member that does not exist locally.
    #[error("no such {kind} `{name}`")]
    NotFound { kind: &'static str, name: String },

    /// `attempts` exceeded `MAX_RETRY` for a pending operation.
    #[error("retries exhausted for `{name}` while in state `{state}`")]
    ExhaustedRetries { name: String, state: &'static str },

    /// Schema load failed while registering a class; the class is discarded.
    #[error("failed to register class `{class}`")]
    ConfigError {
        class: String,
        #[source]
        source: SchemaError,
    },
}

/// Transport-layer faults carried by [`UbusDevError::TransportError`].
#[derive(Debug, Error)]
pub enum TransportFault {
    #[error("peer endpoint name `{0}` does not resolve to a live object")]
    UnknownEndpoint(String),
    #[error("the RPC bus rejected the request")]
    Rejected,
    #[error("the RPC bus is unavailable")]
    Unavailable,
}

/// Errors raised while decoding an inbound notification payload.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum NotifyDecodeError {
    #[error("notification carried no payload")]
    EmptyPayload,
    #[error("unknown notification type `{0}`")]
    UnknownType(String),
    #[error("payload missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` had the wrong shape")]
    WrongFieldShape { field: &'static str },
}

/// Errors raised by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
