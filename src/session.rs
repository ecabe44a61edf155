//! The run loop
//!
//! Composes the engine: connect, drive the handshake, register the
//! lifecycle subscriptions, launch the trigger action, then listen until
//! the workflow reaches a terminal state. The loop ends on a terminal
//! matched event, a server close, a per-run deadline, operator cancel, or
//! an unrecoverable subscription failure - never spontaneously otherwise.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::correlate::{Correlator, CorrelationToken, EventKind, EventRecord, Mode, Verdict};
use crate::error::VigilError;
use crate::handshake;
use crate::protocol::{self, Frame, GRAPHQL_WS_PROTOCOL};
use crate::subscription::{Multiplexer, Routed};
use crate::transport::{ConnectionState, Session};
use crate::trigger::{self, TriggerHandle};

const STARTED_SUBSCRIPTION: &str = "subscription { runStarted { runId ok } }";
const STARTED_FIELD: &str = "runStarted";
const COMPLETED_SUBSCRIPTION: &str = "subscription { runCompleted { runId ok } }";
const COMPLETED_FIELD: &str = "runCompleted";

/// Everything the engine needs to run one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ws_url: String,
    pub bearer: String,
    pub handshake_timeout: Duration,
    /// Overall deadline from listen start to terminal event. `None` waits
    /// indefinitely.
    pub run_deadline: Option<Duration>,
    pub mode: Mode,
}

/// How the workflow reached its terminal state.
#[derive(Debug)]
pub enum Terminal {
    /// A completed-class event matched the run.
    Event(EventRecord),
    /// The server ended the completion subscription before any terminal
    /// event was observed.
    SubscriptionEnded,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub ok: bool,
    pub terminal: Terminal,
}

/// Run the whole workflow: connect, handshake, subscribe, trigger, listen.
///
/// `trigger_action` is launched concurrently once subscriptions are
/// registered; pass `None` to listen without triggering anything. The
/// action's correlation token feeds the correlator; its failures are
/// isolated and never stop the listener.
pub async fn run_to_completion<F>(
    cfg: SessionConfig,
    trigger_action: Option<F>,
) -> Result<RunOutcome, VigilError>
where
    F: Future<Output = Result<Option<CorrelationToken>, VigilError>> + Send + 'static,
{
    let mut session = Session::connect(&cfg.ws_url, GRAPHQL_WS_PROTOCOL, &cfg.bearer).await?;

    if let Err(e) = handshake::complete(&mut session, cfg.handshake_timeout).await {
        session.close().await;
        return Err(e);
    }

    let sender = session.sender();
    let mut mux = Multiplexer::new();
    for (kind, query, field) in [
        (EventKind::Started, STARTED_SUBSCRIPTION, STARTED_FIELD),
        (EventKind::Completed, COMPLETED_SUBSCRIPTION, COMPLETED_FIELD),
    ] {
        let (id, frame) = mux.register(kind, query, field);
        sender.send(&frame).await?;
        debug!(id = %id, field = %field, "subscription registered");
    }
    session.set_state(ConnectionState::Subscribed);

    // Subscriptions are on the wire; only now may the trigger fire.
    let trigger: TriggerHandle = match trigger_action {
        Some(action) => trigger::spawn(action),
        None => trigger::idle(),
    };
    let mut token_rx = trigger.subscribe();
    let mut token_pending = true;

    let mut correlator = Correlator::new(cfg.mode);
    session.set_state(ConnectionState::Listening);

    let deadline = async {
        match cfg.run_deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let result = loop {
        tokio::select! {
            changed = token_rx.changed(), if token_pending => {
                match changed {
                    Ok(()) => {
                        let token = token_rx.borrow_and_update().clone();
                        if let Some(token) = token {
                            token_pending = false;
                            info!(run_id = %token, "correlation token resolved");
                            let verdicts = correlator.resolve_token(token);
                            if let Some(outcome) = verdicts.into_iter().find_map(apply_verdict) {
                                break Ok(outcome);
                            }
                        }
                    }
                    // Trigger finished without a token; keep listening.
                    Err(_) => token_pending = false,
                }
            }

            message = session.next_message() => {
                match message {
                    Err(e) => break Err(e),
                    Ok(None) => break Err(VigilError::ClosedBeforeTerminal),
                    Ok(Some(text)) => match protocol::decode(&text) {
                        Err(e) => warn!(error = %e, "dropping malformed frame"),
                        Ok(Frame::Ping { .. }) => {
                            if let Err(e) = sender.send(&Frame::pong()).await {
                                break Err(e);
                            }
                        }
                        Ok(frame @ (Frame::Next { .. } | Frame::Complete { .. } | Frame::Error { .. })) => {
                            match mux.route(frame) {
                                Routed::Event { kind, record } => {
                                    let verdict = correlator.observe(kind, record);
                                    if let Some(outcome) = apply_verdict(verdict) {
                                        break Ok(outcome);
                                    }
                                }
                                Routed::Ended { kind, id } => {
                                    debug!(id = %id, "server ended subscription");
                                    if kind == EventKind::Completed {
                                        info!("completion subscription ended without a terminal event; treating as terminal");
                                        break Ok(RunOutcome {
                                            ok: true,
                                            terminal: Terminal::SubscriptionEnded,
                                        });
                                    }
                                }
                                Routed::Failed { id, detail, last } => {
                                    if last {
                                        break Err(VigilError::Subscription { id, detail });
                                    }
                                    warn!(id = %id, detail = %detail, "subscription failed; others still live");
                                }
                                Routed::Ignored { reason } => debug!(reason, "frame dropped"),
                            }
                        }
                        Ok(other) => debug!(verb = other.verb(), "frame dropped"),
                    },
                }
            }

            () = &mut deadline => {
                break Err(VigilError::RunTimeout(cfg.run_deadline.unwrap_or_default()));
            }

            _ = tokio::signal::ctrl_c() => {
                info!("cancelled by operator");
                break Err(VigilError::Cancelled);
            }
        }
    };

    trigger.abort();

    // Clean unsubscribe when the socket is still usable.
    let unsubscribe = matches!(
        result,
        Ok(_) | Err(VigilError::RunTimeout(_)) | Err(VigilError::Cancelled)
    );
    if unsubscribe {
        session.set_state(ConnectionState::Closing);
        for id in mux.live_ids() {
            if let Err(e) = sender.send(&Frame::complete(id)).await {
                debug!(error = %e, "unsubscribe not delivered");
                break;
            }
        }
    }
    session.close().await;

    result
}

fn apply_verdict(verdict: Verdict) -> Option<RunOutcome> {
    match verdict {
        Verdict::Progress(record) => {
            info!(
                event = %record.name,
                run_id = record.token.as_deref().unwrap_or("<shared>"),
                "run started"
            );
            None
        }
        Verdict::Terminal(record) => {
            let ok = record.ok.unwrap_or(true);
            info!(
                event = %record.name,
                run_id = record.token.as_deref().unwrap_or("<shared>"),
                ok,
                "run completed"
            );
            Some(RunOutcome {
                ok,
                terminal: Terminal::Event(record),
            })
        }
        Verdict::Buffered | Verdict::Ignored => None,
    }
}
