//! Frame codec for the `graphql-transport-ws` sub-protocol
//!
//! The streaming side of the platform speaks a small JSON frame vocabulary:
//! every message is an object with a required `type` and, depending on the
//! verb, an `id` (subscription identifier) and a `payload`. The codec keeps
//! the wire shape bit-exact on encode and is deliberately tolerant on
//! decode: anything that does not parse into a known frame comes back as a
//! typed [`DecodeError`] so the receive loop can drop it and keep listening.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Sub-protocol name negotiated during the WebSocket upgrade.
pub const GRAPHQL_WS_PROTOCOL: &str = "graphql-transport-ws";

/// One discrete message on the streaming connection.
///
/// Client-to-server verbs: `connection_init`, `pong`, `subscribe`,
/// `complete` (unsubscribe). Server-to-client verbs: `connection_ack`,
/// `ping`, `next`, `complete`, `error`. Frames are immutable once built;
/// one exists per wire message and is discarded after routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    ConnectionAck {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Subscribe {
        id: String,
        payload: SubscribePayload,
    },
    Next {
        id: String,
        payload: NextPayload,
    },
    Complete {
        id: String,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

/// Outbound `subscribe` envelope: the query plus optional variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
}

/// Inbound `next` envelope: a result object keyed by the subscription's
/// root field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Frame {
    /// The `{type:"connection_init", payload:{}}` frame opening a handshake.
    pub fn connection_init() -> Self {
        Frame::ConnectionInit {
            payload: Some(Value::Object(serde_json::Map::new())),
        }
    }

    /// Keepalive reply. Sent bare, `{type:"pong"}`.
    pub fn pong() -> Self {
        Frame::Pong { payload: None }
    }

    pub fn subscribe(id: impl Into<String>, query: impl Into<String>, variables: Option<Value>) -> Self {
        Frame::Subscribe {
            id: id.into(),
            payload: SubscribePayload {
                query: query.into(),
                variables,
            },
        }
    }

    pub fn complete(id: impl Into<String>) -> Self {
        Frame::Complete { id: id.into() }
    }

    /// Wire name of the verb, for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Frame::ConnectionInit { .. } => "connection_init",
            Frame::ConnectionAck { .. } => "connection_ack",
            Frame::Ping { .. } => "ping",
            Frame::Pong { .. } => "pong",
            Frame::Subscribe { .. } => "subscribe",
            Frame::Next { .. } => "next",
            Frame::Complete { .. } => "complete",
            Frame::Error { .. } => "error",
        }
    }
}

/// Why an inbound message failed to decode.
///
/// None of these are fatal to the session: the receive loop logs the reason
/// and keeps going. Unknown or partially-decodable server messages must not
/// crash the listener.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame missing `type` field")]
    MissingType,

    #[error("unknown frame type `{0}`")]
    UnknownType(String),

    #[error("malformed `{frame_type}` frame: {source}")]
    Shape {
        frame_type: String,
        source: serde_json::Error,
    },
}

const KNOWN_TYPES: &[&str] = &[
    "connection_init",
    "connection_ack",
    "ping",
    "pong",
    "subscribe",
    "next",
    "complete",
    "error",
];

/// Serialize a frame to its wire form.
pub fn encode(frame: &Frame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Decode one inbound text message into a frame.
pub fn decode(text: &str) -> Result<Frame, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let frame_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_string();

    match serde_json::from_value::<Frame>(value) {
        Ok(frame) => Ok(frame),
        Err(source) => {
            if KNOWN_TYPES.contains(&frame_type.as_str()) {
                Err(DecodeError::Shape { frame_type, source })
            } else {
                Err(DecodeError::UnknownType(frame_type))
            }
        }
    }
}
