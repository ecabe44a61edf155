//! Handshake coordinator
//!
//! Drives the connection from "just connected" to "ready to subscribe":
//! send `connection_init`, answer keepalive probes, recognize the server's
//! acknowledgement or rejection. The state machine itself is synchronous
//! and frame-in/step-out so it can be tested without a socket; [`complete`]
//! is the async driver that runs it against a live session under a
//! deadline.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::VigilError;
use crate::protocol::{self, Frame};
use crate::transport::{ConnectionState, Session};

/// Handshake progress. `Acked` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    NotStarted,
    InitSent,
    Acked,
    Rejected,
}

/// What the driver should do with the step result.
#[derive(Debug, PartialEq)]
pub enum Step {
    /// Send this frame (a pong reply) and keep waiting.
    Reply(Frame),
    /// Server acknowledged; safe to subscribe.
    Acked,
    /// Server rejected the handshake; the raw payload is surfaced verbatim.
    Rejected(String),
    /// Frame is irrelevant to the handshake; keep waiting.
    Continue,
}

pub struct Coordinator {
    state: State,
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            state: State::NotStarted,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Produce the opening `connection_init` frame. Only valid once; a
    /// session performs at most one handshake.
    pub fn init_frame(&mut self) -> Frame {
        debug_assert_eq!(self.state, State::NotStarted, "handshake already started");
        self.state = State::InitSent;
        Frame::connection_init()
    }

    /// Feed one inbound frame through the state machine.
    pub fn on_frame(&mut self, frame: Frame) -> Step {
        if self.state != State::InitSent {
            return Step::Continue;
        }
        match frame {
            Frame::Ping { .. } => Step::Reply(Frame::pong()),
            Frame::ConnectionAck { .. } => {
                self.state = State::Acked;
                Step::Acked
            }
            Frame::Error { payload, .. } => {
                self.state = State::Rejected;
                let raw = payload
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "no details provided".to_string());
                Step::Rejected(raw)
            }
            other => {
                debug!(verb = other.verb(), "ignoring frame during handshake");
                Step::Continue
            }
        }
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the handshake against a live session.
///
/// On success the session state is `Acked` and subscribe frames may be
/// sent. Rejection, a close during the exchange, and the deadline all
/// abort the whole workflow.
pub async fn complete(session: &mut Session, deadline: Duration) -> Result<(), VigilError> {
    let sender = session.sender();
    let mut coordinator = Coordinator::new();

    sender.send(&coordinator.init_frame()).await?;
    session.set_state(ConnectionState::HandshakeInit);

    let exchange = async {
        loop {
            let Some(text) = session.next_message().await? else {
                return Err(VigilError::ClosedDuringHandshake);
            };
            match protocol::decode(&text) {
                Ok(frame) => match coordinator.on_frame(frame) {
                    Step::Reply(pong) => sender.send(&pong).await?,
                    Step::Acked => return Ok(()),
                    Step::Rejected(raw) => return Err(VigilError::HandshakeRejected(raw)),
                    Step::Continue => {}
                },
                Err(e) => {
                    warn!(error = %e, "dropping undecodable message during handshake");
                }
            }
        }
    };

    timeout(deadline, exchange)
        .await
        .map_err(|_| VigilError::HandshakeTimeout(deadline))??;

    session.set_state(ConnectionState::Acked);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_init_frame_advances_state() {
        let mut c = Coordinator::new();
        assert_eq!(c.state(), State::NotStarted);
        let frame = c.init_frame();
        assert_eq!(frame, Frame::connection_init());
        assert_eq!(c.state(), State::InitSent);
    }

    #[test]
    fn test_one_pong_per_ping_and_no_advance() {
        let mut c = Coordinator::new();
        let _ = c.init_frame();

        for _ in 0..3 {
            let step = c.on_frame(Frame::Ping { payload: None });
            assert_eq!(step, Step::Reply(Frame::pong()));
            assert_eq!(c.state(), State::InitSent);
        }
    }

    #[test]
    fn test_ack_is_terminal() {
        let mut c = Coordinator::new();
        let _ = c.init_frame();

        assert_eq!(c.on_frame(Frame::ConnectionAck { payload: None }), Step::Acked);
        assert_eq!(c.state(), State::Acked);

        // Frames after ack are the run loop's business, not the handshake's.
        assert_eq!(c.on_frame(Frame::Ping { payload: None }), Step::Continue);
    }

    #[test]
    fn test_error_rejects_with_raw_payload() {
        let mut c = Coordinator::new();
        let _ = c.init_frame();

        let step = c.on_frame(Frame::Error {
            id: None,
            payload: Some(json!({"message": "unauthorized"})),
        });
        match step {
            Step::Rejected(raw) => assert!(raw.contains("unauthorized")),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(c.state(), State::Rejected);
    }

    #[test]
    fn test_error_without_payload_still_rejects() {
        let mut c = Coordinator::new();
        let _ = c.init_frame();

        match c.on_frame(Frame::Error { id: None, payload: None }) {
            Step::Rejected(raw) => assert_eq!(raw, "no details provided"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_unrelated_frames_are_ignored() {
        let mut c = Coordinator::new();
        let _ = c.init_frame();

        let step = c.on_frame(Frame::Complete { id: "sub-1".into() });
        assert_eq!(step, Step::Continue);
        assert_eq!(c.state(), State::InitSent);
    }
}
