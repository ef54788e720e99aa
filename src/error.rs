use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::TransactionId;

/// Errors that can occur during RPC operations
#[derive(Error, Debug)]
pub enum RpcError {
    /// Decoded message is not a well-formed `[id, actionOrResult, argument]` frame
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// No handler registered for the requested action
    #[error("no handler found for action: {0}")]
    UnknownAction(String),

    /// Reply arrived for a transaction with no pending continuation
    #[error("no pending transaction for id {0}")]
    UnknownTransaction(TransactionId),

    /// Responder received a push envelope (id 0)
    #[error("unexpected push on responder for action: {0}")]
    UnexpectedPushOnResponder(String),

    /// Channel closed while the transaction was outstanding
    #[error("connection lost")]
    ConnectionLost,

    /// Request timed out waiting for a reply
    #[error("request timed out")]
    Timeout,

    /// Action handler failed on the remote side
    #[error("handler error: {0}")]
    Handler(String),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Channel provider failure
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;

/// Failure category carried back to the initiator inside a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The responder has no handler for the requested action.
    UnknownAction,
    /// The handler returned an error or panicked.
    Handler,
}

/// Wire form of a failed transaction.
///
/// Travels in the third field of a reply envelope, which is otherwise unused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn unknown_action(action: &str) -> Self {
        // ---
        Self {
            kind: RemoteErrorKind::UnknownAction,
            message: action.to_string(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        // ---
        Self {
            kind: RemoteErrorKind::Handler,
            message: message.into(),
        }
    }
}

impl From<RemoteError> for RpcError {
    fn from(err: RemoteError) -> Self {
        // ---
        match err.kind {
            RemoteErrorKind::UnknownAction => RpcError::UnknownAction(err.message),
            RemoteErrorKind::Handler => RpcError::Handler(err.message),
        }
    }
}

impl From<&RpcError> for RemoteError {
    /// Collapse a local dispatch failure into its wire form.
    fn from(err: &RpcError) -> Self {
        // ---
        match err {
            RpcError::UnknownAction(action) => RemoteError::unknown_action(action),
            RpcError::Handler(msg) => RemoteError::handler(msg.clone()),
            other => RemoteError::handler(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_remote_error_maps_to_local_variant() {
        // ---
        let err: RpcError = RemoteError::unknown_action("zoom").into();
        assert!(matches!(err, RpcError::UnknownAction(ref a) if a == "zoom"));

        let err: RpcError = RemoteError::handler("boom").into();
        assert!(matches!(err, RpcError::Handler(ref m) if m == "boom"));
    }

    #[test]
    fn test_local_error_collapses_to_handler_kind() {
        // ---
        let remote = RemoteError::from(&RpcError::Timeout);
        assert_eq!(remote.kind, RemoteErrorKind::Handler);
        assert_eq!(remote.message, "request timed out");
    }
}
