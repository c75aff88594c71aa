use crate::message::{Dict, Id, Payload};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown message type: {0}")]
    UnknownType(u64),

    #[error("Invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid handshake request: {0}")]
    InvalidRequest(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Connection closed")]
    ConnectionClosed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),

    #[error("Session aborted: {reason}")]
    SessionAborted { reason: String, details: Dict },

    #[error("Invalid session transition from {from} on {event}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },

    #[error("Session closed")]
    SessionClosed,
}

impl From<DecodeError> for ProtocolError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::MalformedPayload(reason) => ProtocolError::MalformedPayload(reason),
            DecodeError::UnknownType(code) => ProtocolError::UnknownMessageType(code),
            DecodeError::Json(e) => ProtocolError::MalformedPayload(e.to_string()),
        }
    }
}

/// Failure of a correlated request (CALL, PUBLISH, REGISTER, ...).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error("Request {request_id} timed out")]
    Timeout { request_id: Id },

    #[error("Router returned error {error}")]
    Remote {
        error: String,
        details: Dict,
        payload: Payload,
    },

    #[error("Session closed before the request completed")]
    SessionClosed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubscriptionError {
    #[error("Subscription to {topic} failed: {reason}")]
    SetupFailed { topic: String, reason: String },

    #[error("Unsubscribe from {topic} failed: {reason}")]
    TeardownFailed { topic: String, reason: String },

    #[error("Session closed")]
    SessionClosed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("Mandatory feed unavailable: {0}")]
    MandatoryFeedUnavailable(String),

    #[error("Stale baseline version {received} (current {current})")]
    StaleVersion { current: u64, received: u64 },
}

#[derive(Error, Debug)]
pub enum WampSyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Merge(#[from] MergeError),
}
