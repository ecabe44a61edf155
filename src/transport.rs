//! Transport session - the single streaming connection
//!
//! Owns the WebSocket carrying the subscription sub-protocol. The socket is
//! split on connect: the receive half is owned exclusively by the run loop
//! (receives are sequential and blocking), while sends go through a
//! cloneable [`FrameSender`] that serializes whole frames behind a mutex.
//! A keepalive reply and a subscribe frame may race from different tasks;
//! the lock guarantees they never interleave mid-frame.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use crate::error::VigilError;
use crate::protocol::{self, Frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of one streaming session.
///
/// Exactly one instance exists per session. The handshake coordinator moves
/// it from `Connecting` through `Acked`; the run loop owns the rest. A
/// handshake rejection is the failed flavor of `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    HandshakeInit,
    Acked,
    Subscribed,
    Listening,
    Closing,
    Closed,
}

/// Cloneable, mutex-serialized send path. One frame at a time.
#[derive(Clone)]
pub struct FrameSender {
    sink: Arc<Mutex<SplitSink<WsStream, Message>>>,
}

impl FrameSender {
    /// Encode and send one protocol frame as one text message.
    pub async fn send(&self, frame: &Frame) -> Result<(), VigilError> {
        let text = protocol::encode(frame).map_err(VigilError::Json)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| VigilError::Send(format!("failed to send {} frame: {e}", frame.verb())))
    }

    /// Close the write half. Best effort; the peer may already be gone.
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(error = %e, "close handshake not delivered");
        }
    }
}

/// The streaming session: connect, send, receive, close.
pub struct Session {
    sender: FrameSender,
    receiver: SplitStream<WsStream>,
    state: ConnectionState,
}

impl Session {
    /// Connect to the streaming endpoint, negotiating the sub-protocol and
    /// carrying the bearer token on the upgrade request.
    pub async fn connect(url: &str, subprotocol: &str, bearer: &str) -> Result<Self, VigilError> {
        let host = url.split("//").last().unwrap_or("localhost");
        let host = host.split('/').next().unwrap_or(host);

        let request = Request::builder()
            .uri(url)
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Protocol", subprotocol)
            .header("Authorization", format!("Bearer {bearer}"))
            .body(())
            .map_err(|e| VigilError::Connect(format!("failed to build upgrade request: {e}")))?;

        let (ws, response) = connect_async_with_config(request, None, false)
            .await
            .map_err(|e| VigilError::Connect(format!("WebSocket connect failed: {e}")))?;

        debug!(status = %response.status(), url = %url, "streaming connection established");

        let (sink, receiver) = ws.split();
        Ok(Self {
            sender: FrameSender {
                sink: Arc::new(Mutex::new(sink)),
            },
            receiver,
            state: ConnectionState::Connecting,
        })
    }

    /// Handle to the serialized send path.
    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        debug!(from = ?self.state, to = ?state, "connection state change");
        self.state = state;
    }

    /// Receive the next text message.
    ///
    /// `Ok(None)` means the peer closed the connection (close frame or end
    /// of stream). WebSocket-level ping/pong control frames are handled by
    /// the stack and skipped here; the sub-protocol's keepalive is a JSON
    /// frame and comes back as a normal message.
    pub async fn next_message(&mut self) -> Result<Option<String>, VigilError> {
        while let Some(msg) = self.receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => return Ok(Some(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => {
                        warn!("dropping non-UTF-8 binary message");
                        continue;
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(frame = ?frame, "server closed connection");
                    self.state = ConnectionState::Closing;
                    return Ok(None);
                }
                Ok(_) => continue,
                Err(e) => {
                    self.state = ConnectionState::Closing;
                    return Err(VigilError::Transport(format!("WebSocket error: {e}")));
                }
            }
        }
        self.state = ConnectionState::Closed;
        Ok(None)
    }

    /// Close the session. Idempotent.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closing;
        self.sender.close().await;
        self.state = ConnectionState::Closed;
    }
}
