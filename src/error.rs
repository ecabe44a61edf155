//! Error types for vigil

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VigilError {
    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Handshake rejected by server: {0}")]
    HandshakeRejected(String),

    #[error("Connection closed during handshake")]
    ClosedDuringHandshake,

    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Subscription {id} failed: {detail}")]
    Subscription { id: String, detail: String },

    #[error("Trigger action failed: {0}")]
    Trigger(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Send error: {0}")]
    Send(String),

    #[error("Connection closed before a terminal event was observed")]
    ClosedBeforeTerminal,

    #[error("Timed out waiting for a terminal event after {0:?}")]
    RunTimeout(Duration),

    #[error("Cancelled by operator")]
    Cancelled,

    #[error("API error: {0}")]
    Api(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
