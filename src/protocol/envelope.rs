//! Wire envelope and codec.
//!
//! Every frame on the channel is a JSON array `[id, actionOrResult, argument]`:
//!
//! - request: `[n > 0, action, arg]`
//! - reply:   `[n > 0, result, <unused>]`
//! - push:    `[0, action, arg]`
//!
//! The same wire shape is shared by all three kinds, so a frame can only be
//! classified once its direction is known. [`RawEnvelope`] is the
//! unclassified triple; [`Envelope`] is the classified form the engines work
//! with.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Value};

use crate::{RemoteError, Result, RpcError, TransactionId};

/// Which engine a frame is travelling towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Requests, from initiator to responder.
    ToResponder,
    /// Replies and pushes, from responder to initiator.
    ToInitiator,
}

/// Unclassified `[id, actionOrResult, argument]` triple.
///
/// `argument` is `None` when the frame carried only two fields, which is
/// tolerated for replies.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEnvelope {
    pub id: TransactionId,
    pub action_or_result: Value,
    pub argument: Option<Value>,
}

impl RawEnvelope {
    /// Serialize to a JSON frame. Always emits three fields.
    pub fn encode(&self) -> Result<Bytes> {
        // ---
        let frame = json!([
            self.id.get(),
            self.action_or_result,
            self.argument.clone().unwrap_or(Value::Null)
        ]);
        Ok(Bytes::from(serde_json::to_vec(&frame)?))
    }

    /// Parse a JSON frame.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::MalformedEnvelope`] if the frame is not valid JSON,
    /// is not a 2- or 3-element array, or its id is not a non-negative
    /// integer.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        // ---
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| RpcError::MalformedEnvelope(format!("invalid JSON: {e}")))?;

        let fields = match value {
            Value::Array(fields) => fields,
            other => {
                return Err(RpcError::MalformedEnvelope(format!(
                    "expected array, got {other}"
                )))
            }
        };

        if fields.len() != 2 && fields.len() != 3 {
            return Err(RpcError::MalformedEnvelope(format!(
                "expected 3 fields, got {}",
                fields.len()
            )));
        }

        let mut fields = fields.into_iter();
        let id = match fields.next().as_ref().and_then(Value::as_u64) {
            Some(id) => TransactionId::from(id),
            None => {
                return Err(RpcError::MalformedEnvelope(
                    "transaction id is not a non-negative integer".into(),
                ))
            }
        };
        let action_or_result = fields.next().unwrap_or(Value::Null);
        let argument = fields.next();

        Ok(Self {
            id,
            action_or_result,
            argument,
        })
    }
}

/// Classified envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Invoke `action` on the responder; a reply with the same id is expected.
    Request {
        id: TransactionId,
        action: Arc<str>,
        arg: Value,
    },

    /// Result of the request with the same id.
    Reply {
        id: TransactionId,
        outcome: std::result::Result<Value, RemoteError>,
    },

    /// Fire-and-forget notification from responder to initiator.
    Push { action: Arc<str>, arg: Value },
}

impl Envelope {
    // ---
    pub fn request(id: TransactionId, action: impl Into<Arc<str>>, arg: Value) -> Self {
        // ---
        Envelope::Request {
            id,
            action: action.into(),
            arg,
        }
    }

    pub fn reply(id: TransactionId, outcome: std::result::Result<Value, RemoteError>) -> Self {
        // ---
        Envelope::Reply { id, outcome }
    }

    pub fn push(action: impl Into<Arc<str>>, arg: Value) -> Self {
        // ---
        Envelope::Push {
            action: action.into(),
            arg,
        }
    }

    /// Transaction id as carried on the wire (0 for pushes).
    pub fn id(&self) -> TransactionId {
        // ---
        match self {
            Envelope::Request { id, .. } | Envelope::Reply { id, .. } => *id,
            Envelope::Push { .. } => TransactionId::PUSH,
        }
    }

    /// Flatten into the wire triple.
    pub fn into_raw(self) -> RawEnvelope {
        // ---
        match self {
            Envelope::Request { id, action, arg } => RawEnvelope {
                id,
                action_or_result: Value::String(action.to_string()),
                argument: Some(arg),
            },
            Envelope::Reply {
                id,
                outcome: Ok(result),
            } => RawEnvelope {
                id,
                action_or_result: result,
                argument: Some(Value::Null),
            },
            Envelope::Reply {
                id,
                outcome: Err(err),
            } => RawEnvelope {
                id,
                action_or_result: Value::Null,
                argument: Some(json!({ "error": err })),
            },
            Envelope::Push { action, arg } => RawEnvelope {
                id: TransactionId::PUSH,
                action_or_result: Value::String(action.to_string()),
                argument: Some(arg),
            },
        }
    }

    /// Classify a wire triple according to the direction it travelled.
    ///
    /// # Errors
    ///
    /// - [`RpcError::UnexpectedPushOnResponder`] for an id-0 frame sent to
    ///   the responder.
    /// - [`RpcError::MalformedEnvelope`] when an action name is not a string
    ///   or a request/push frame lacks its argument field.
    pub fn from_raw(raw: RawEnvelope, direction: Direction) -> Result<Self> {
        // ---
        let RawEnvelope {
            id,
            action_or_result,
            argument,
        } = raw;

        match (direction, id.is_push()) {
            (Direction::ToResponder, true) => Err(RpcError::UnexpectedPushOnResponder(
                describe_action(&action_or_result),
            )),
            (Direction::ToResponder, false) => Ok(Envelope::Request {
                id,
                action: action_name(action_or_result)?,
                arg: required_argument(argument)?,
            }),
            (Direction::ToInitiator, true) => Ok(Envelope::Push {
                action: action_name(action_or_result)?,
                arg: required_argument(argument)?,
            }),
            (Direction::ToInitiator, false) => Ok(Envelope::Reply {
                id,
                outcome: reply_outcome(action_or_result, argument),
            }),
        }
    }

    pub fn encode(self) -> Result<Bytes> {
        // ---
        self.into_raw().encode()
    }

    pub fn decode(raw: &[u8], direction: Direction) -> Result<Self> {
        // ---
        Self::from_raw(RawEnvelope::decode(raw)?, direction)
    }
}

fn action_name(value: Value) -> Result<Arc<str>> {
    // ---
    match value {
        Value::String(s) => Ok(Arc::from(s)),
        other => Err(RpcError::MalformedEnvelope(format!(
            "action name must be a string, got {other}"
        ))),
    }
}

fn describe_action(value: &Value) -> String {
    // ---
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn required_argument(argument: Option<Value>) -> Result<Value> {
    // ---
    argument.ok_or_else(|| RpcError::MalformedEnvelope("missing argument field".into()))
}

/// A reply's third field is unused unless it carries `{"error": RemoteError}`.
fn reply_outcome(result: Value, third: Option<Value>) -> std::result::Result<Value, RemoteError> {
    // ---
    let remote = third
        .and_then(|mut v| v.get_mut("error").map(Value::take))
        .and_then(|e| serde_json::from_value::<RemoteError>(e).ok());

    match remote {
        Some(err) => Err(err),
        None => Ok(result),
    }
}
