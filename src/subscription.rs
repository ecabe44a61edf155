//! Subscription multiplexer
//!
//! Runs several independent subscriptions over the one streaming
//! connection. Each registration gets a unique id; inbound `next`,
//! `complete` and `error` frames are classified by that id and by the
//! shape of their payload. Frames for unknown ids are dropped, never
//! fatal.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::correlate::{EventKind, EventRecord};
use crate::protocol::Frame;

/// One registered subscription. Created before its subscribe frame is
/// sent; never mutated apart from liveness; released with the session.
#[derive(Debug, Clone)]
pub struct SubscriptionRegistration {
    pub id: String,
    pub query: String,
    /// Root field name routing inbound payload data to this registration.
    pub field: String,
    pub kind: EventKind,
    live: bool,
}

/// Where an inbound frame ended up.
#[derive(Debug, PartialEq)]
pub enum Routed {
    /// A `next` frame decoded into a lifecycle event.
    Event { kind: EventKind, record: EventRecord },
    /// The server ended one subscription.
    Ended { kind: EventKind, id: String },
    /// A per-subscription error. `last` is set when no live registration
    /// remains, which makes the failure fatal to the session.
    Failed { id: String, detail: String, last: bool },
    /// Dropped without effect.
    Ignored { reason: &'static str },
}

pub struct Multiplexer {
    subs: HashMap<String, SubscriptionRegistration>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self {
            subs: HashMap::new(),
        }
    }

    /// Register a subscription and produce its subscribe frame. The caller
    /// must only send the frame once the connection is acknowledged.
    pub fn register(&mut self, kind: EventKind, query: &str, field: &str) -> (String, Frame) {
        let id = Uuid::new_v4().to_string();
        let registration = SubscriptionRegistration {
            id: id.clone(),
            query: query.to_string(),
            field: field.to_string(),
            kind,
            live: true,
        };
        let frame = Frame::subscribe(id.clone(), query, None);
        let _ = self.subs.insert(id.clone(), registration);
        (id, frame)
    }

    /// Ids of registrations the server has not ended or failed.
    pub fn live_ids(&self) -> Vec<String> {
        self.subs
            .values()
            .filter(|s| s.live)
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn any_live(&self) -> bool {
        self.subs.values().any(|s| s.live)
    }

    /// Classify one inbound frame by subscription id and payload shape.
    pub fn route(&mut self, frame: Frame) -> Routed {
        match frame {
            Frame::Next { id, payload } => {
                let Some(sub) = self.subs.get(&id) else {
                    debug!(id = %id, "next frame for unknown subscription");
                    return Routed::Ignored {
                        reason: "unknown subscription id",
                    };
                };
                let Some(data) = payload.data else {
                    return Routed::Ignored {
                        reason: "next frame without data",
                    };
                };
                let Some(event) = data.get(&sub.field) else {
                    debug!(id = %id, field = %sub.field, "next frame without the subscription's field");
                    return Routed::Ignored {
                        reason: "next frame missing subscription field",
                    };
                };
                Routed::Event {
                    kind: sub.kind,
                    record: EventRecord::from_value(&sub.field, event),
                }
            }
            Frame::Complete { id } => match self.subs.get_mut(&id) {
                Some(sub) => {
                    sub.live = false;
                    Routed::Ended { kind: sub.kind, id }
                }
                None => {
                    debug!(id = %id, "complete frame for unknown subscription");
                    Routed::Ignored {
                        reason: "unknown subscription id",
                    }
                }
            },
            Frame::Error { id: Some(id), payload } => match self.subs.get_mut(&id) {
                Some(sub) => {
                    sub.live = false;
                    let detail = payload
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "no details provided".to_string());
                    let last = !self.subs.values().any(|s| s.live);
                    Routed::Failed { id, detail, last }
                }
                None => {
                    debug!(id = %id, "error frame for unknown subscription");
                    Routed::Ignored {
                        reason: "unknown subscription id",
                    }
                }
            },
            other => {
                debug!(verb = other.verb(), "frame is not routable");
                Routed::Ignored {
                    reason: "not a subscription frame",
                }
            }
        }
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NextPayload;
    use serde_json::{json, Value};

    fn next_frame(id: &str, data: Value) -> Frame {
        Frame::Next {
            id: id.to_string(),
            payload: NextPayload { data: Some(data) },
        }
    }

    #[test]
    fn test_register_allocates_distinct_ids() {
        let mut mux = Multiplexer::new();
        let (a, _) = mux.register(EventKind::Started, "subscription { runStarted { runId ok } }", "runStarted");
        let (b, _) = mux.register(EventKind::Completed, "subscription { runCompleted { runId ok } }", "runCompleted");
        assert_ne!(a, b);
        assert_eq!(mux.live_ids().len(), 2);
    }

    #[test]
    fn test_register_emits_subscribe_frame() {
        let mut mux = Multiplexer::new();
        let (id, frame) = mux.register(EventKind::Started, "subscription { runStarted { runId ok } }", "runStarted");
        match frame {
            Frame::Subscribe { id: frame_id, payload } => {
                assert_eq!(frame_id, id);
                assert!(payload.query.contains("runStarted"));
                assert!(payload.variables.is_none());
            }
            other => panic!("expected subscribe frame, got {other:?}"),
        }
    }

    #[test]
    fn test_routes_next_to_matching_registration_only() {
        let mut mux = Multiplexer::new();
        let (started_id, _) = mux.register(EventKind::Started, "q1", "runStarted");
        let (_completed_id, _) = mux.register(EventKind::Completed, "q2", "runCompleted");

        let routed = mux.route(next_frame(
            &started_id,
            json!({"runStarted": {"runId": "T123", "ok": true}}),
        ));
        match routed {
            Routed::Event { kind, record } => {
                assert_eq!(kind, EventKind::Started);
                assert_eq!(record.name, "runStarted");
                assert_eq!(record.token.as_deref(), Some("T123"));
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_id_is_ignored() {
        let mut mux = Multiplexer::new();
        let _ = mux.register(EventKind::Started, "q1", "runStarted");

        let routed = mux.route(next_frame("nope", json!({"runStarted": {}})));
        assert_eq!(
            routed,
            Routed::Ignored {
                reason: "unknown subscription id"
            }
        );
    }

    #[test]
    fn test_next_without_field_is_ignored() {
        let mut mux = Multiplexer::new();
        let (id, _) = mux.register(EventKind::Started, "q1", "runStarted");

        let routed = mux.route(next_frame(&id, json!({"somethingElse": {}})));
        assert_eq!(
            routed,
            Routed::Ignored {
                reason: "next frame missing subscription field"
            }
        );
    }

    #[test]
    fn test_complete_ends_one_subscription() {
        let mut mux = Multiplexer::new();
        let (started_id, _) = mux.register(EventKind::Started, "q1", "runStarted");
        let (completed_id, _) = mux.register(EventKind::Completed, "q2", "runCompleted");

        let routed = mux.route(Frame::Complete { id: started_id.clone() });
        assert_eq!(
            routed,
            Routed::Ended {
                kind: EventKind::Started,
                id: started_id
            }
        );
        assert_eq!(mux.live_ids(), vec![completed_id]);
    }

    #[test]
    fn test_subscription_error_is_fatal_only_when_last() {
        let mut mux = Multiplexer::new();
        let (started_id, _) = mux.register(EventKind::Started, "q1", "runStarted");
        let (completed_id, _) = mux.register(EventKind::Completed, "q2", "runCompleted");

        let routed = mux.route(Frame::Error {
            id: Some(started_id),
            payload: Some(json!([{"message": "denied"}])),
        });
        match routed {
            Routed::Failed { last, detail, .. } => {
                assert!(!last);
                assert!(detail.contains("denied"));
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let routed = mux.route(Frame::Error {
            id: Some(completed_id),
            payload: None,
        });
        match routed {
            Routed::Failed { last, .. } => assert!(last),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!mux.any_live());
    }
}
