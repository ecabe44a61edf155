//! vigil - trigger platform operations and await their lifecycle events
//!
//! The platform exposes two channels: a GraphQL endpoint over HTTP that
//! triggers an operation, and a streaming connection speaking the
//! `graphql-transport-ws` sub-protocol that reports the operation's
//! lifecycle. vigil fires the trigger, multiplexes the lifecycle
//! subscriptions over one session, answers the server's keepalive probes,
//! and correlates inbound events to the triggered run until a terminal
//! event is observed.
//!
//! ## Engine
//!
//! - **protocol**: the JSON frame vocabulary, tolerant decode
//! - **transport**: the single streaming connection, serialized sends
//! - **handshake**: init -> keepalive probes -> acknowledgement
//! - **subscription**: several subscriptions over one connection
//! - **correlate**: which run an event belongs to, and when to stop
//! - **trigger**: the concurrent triggering action, failures isolated
//! - **session**: the composed run loop

pub mod api;
pub mod auth;
pub mod config;
pub mod correlate;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod session;
pub mod subscription;
pub mod transport;
pub mod trigger;
pub mod upload;

pub use config::{Args, Command};
pub use correlate::Mode;
pub use error::VigilError;
pub use session::{run_to_completion, RunOutcome, SessionConfig, Terminal};
