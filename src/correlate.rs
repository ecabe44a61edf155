//! Event correlator
//!
//! Decides whether a decoded lifecycle event belongs to the run this
//! session triggered, and whether it is terminal. The correlation token
//! (the platform's run id) does not exist until the trigger call returns,
//! so the correlator runs in two modes over its lifetime:
//!
//! - token unknown: in `PerRun` mode events are buffered, never discarded,
//!   and replayed in arrival order once the token resolves;
//! - token known: events match by name and token.
//!
//! `Shared` mode matches by event name alone. That is only correct when at
//! most one outstanding run exists per session (the batch workflow); the
//! caller opts into it explicitly.

use serde_json::Value;
use tracing::debug;

/// Opaque run identifier returned by the trigger call.
pub type CorrelationToken = String;

/// Lifecycle phase a subscription observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Completed,
}

/// One decoded lifecycle event from a `next` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Root field name the event arrived under (e.g. `runCompleted`).
    pub name: String,
    /// Correlation token carried by the event, when present.
    pub token: Option<String>,
    /// Remote success flag, when present.
    pub ok: Option<bool>,
    /// Raw event object, kept for diagnostics.
    pub raw: Value,
}

impl EventRecord {
    /// Build a record from the subscription's slice of `payload.data`.
    pub fn from_value(name: &str, value: &Value) -> Self {
        Self {
            name: name.to_string(),
            token: value.get("runId").and_then(Value::as_str).map(str::to_string),
            ok: value.get("ok").and_then(Value::as_bool),
            raw: value.clone(),
        }
    }
}

/// Matching policy for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Match by name and token; buffer while the token is unknown.
    PerRun,
    /// Match by event name only. Valid only while at most one run is
    /// outstanding on the session.
    Shared,
}

/// Outcome of observing one event.
#[derive(Debug, PartialEq)]
pub enum Verdict {
    /// Held until the correlation token is known.
    Buffered,
    /// Not ours (token mismatch, missing token, or duplicate terminal).
    Ignored,
    /// A started-class event for our run; keep listening.
    Progress(EventRecord),
    /// A completed-class event for our run; the sole success exit.
    Terminal(EventRecord),
}

pub struct Correlator {
    mode: Mode,
    token: Option<CorrelationToken>,
    buffer: Vec<(EventKind, EventRecord)>,
    terminal_seen: bool,
}

impl Correlator {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            token: None,
            buffer: Vec::new(),
            terminal_seen: false,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Number of events held while the token is unknown.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Inspect one event and decide continue-vs-terminate.
    pub fn observe(&mut self, kind: EventKind, record: EventRecord) -> Verdict {
        match self.mode {
            Mode::Shared => self.evaluate_by_name(kind, record),
            Mode::PerRun => {
                if self.token.is_some() {
                    self.evaluate_with_token(kind, record)
                } else {
                    debug!(event = %record.name, "buffering event until run id is known");
                    self.buffer.push((kind, record));
                    Verdict::Buffered
                }
            }
        }
    }

    /// Publish the resolved token and replay buffered events in arrival
    /// order. Returns the verdicts the buffered events now produce;
    /// terminal fires at most once across buffered and live events.
    pub fn resolve_token(&mut self, token: CorrelationToken) -> Vec<Verdict> {
        if self.mode == Mode::Shared {
            debug!(token = %token, "shared mode ignores the correlation token");
            return Vec::new();
        }
        if self.token.is_some() {
            debug!("correlation token already resolved");
            return Vec::new();
        }
        self.token = Some(token);

        let held = std::mem::take(&mut self.buffer);
        held.into_iter()
            .map(|(kind, record)| self.evaluate_with_token(kind, record))
            .filter(|v| *v != Verdict::Ignored)
            .collect()
    }

    fn evaluate_with_token(&mut self, kind: EventKind, record: EventRecord) -> Verdict {
        let expected = self.token.as_deref();
        if record.token.as_deref() != expected {
            debug!(
                event = %record.name,
                token = record.token.as_deref().unwrap_or("<none>"),
                "event does not belong to this run"
            );
            return Verdict::Ignored;
        }
        self.classify(kind, record)
    }

    fn evaluate_by_name(&mut self, kind: EventKind, record: EventRecord) -> Verdict {
        self.classify(kind, record)
    }

    fn classify(&mut self, kind: EventKind, record: EventRecord) -> Verdict {
        match kind {
            EventKind::Started => Verdict::Progress(record),
            EventKind::Completed => {
                if self.terminal_seen {
                    return Verdict::Ignored;
                }
                self.terminal_seen = true;
                Verdict::Terminal(record)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str, token: Option<&str>, ok: Option<bool>) -> EventRecord {
        let mut raw = serde_json::Map::new();
        if let Some(t) = token {
            let _ = raw.insert("runId".into(), json!(t));
        }
        if let Some(o) = ok {
            let _ = raw.insert("ok".into(), json!(o));
        }
        EventRecord::from_value(name, &Value::Object(raw))
    }

    #[test]
    fn test_from_value_extracts_fields() {
        let r = EventRecord::from_value(
            "runCompleted",
            &json!({"runId": "T123", "ok": false, "detail": "oom"}),
        );
        assert_eq!(r.token.as_deref(), Some("T123"));
        assert_eq!(r.ok, Some(false));
        assert_eq!(r.raw["detail"], "oom");
    }

    #[test]
    fn test_per_run_scenario_t123() {
        // subscribe to {started, completed} for token T123
        let mut c = Correlator::new(Mode::PerRun);
        let _ = c.resolve_token("T123".into());

        // started with T123: progress, loop continues
        let v = c.observe(EventKind::Started, record("runStarted", Some("T123"), None));
        assert!(matches!(v, Verdict::Progress(_)));

        // completed with T999: no termination
        let v = c.observe(EventKind::Completed, record("runCompleted", Some("T999"), Some(true)));
        assert_eq!(v, Verdict::Ignored);

        // completed with T123: terminal
        let v = c.observe(EventKind::Completed, record("runCompleted", Some("T123"), Some(true)));
        assert!(matches!(v, Verdict::Terminal(_)));
    }

    #[test]
    fn test_terminal_fires_exactly_once() {
        let mut c = Correlator::new(Mode::PerRun);
        let _ = c.resolve_token("T1".into());

        let first = c.observe(EventKind::Completed, record("runCompleted", Some("T1"), Some(true)));
        assert!(matches!(first, Verdict::Terminal(_)));

        let second = c.observe(EventKind::Completed, record("runCompleted", Some("T1"), Some(true)));
        assert_eq!(second, Verdict::Ignored);
    }

    #[test]
    fn test_events_buffer_until_token_resolves() {
        let mut c = Correlator::new(Mode::PerRun);

        assert_eq!(
            c.observe(EventKind::Started, record("runStarted", Some("T1"), None)),
            Verdict::Buffered
        );
        assert_eq!(
            c.observe(EventKind::Completed, record("runCompleted", Some("T1"), Some(true))),
            Verdict::Buffered
        );
        assert_eq!(c.buffered(), 2);

        let verdicts = c.resolve_token("T1".into());
        assert_eq!(verdicts.len(), 2);
        assert!(matches!(verdicts[0], Verdict::Progress(_)));
        assert!(matches!(verdicts[1], Verdict::Terminal(_)));
        assert_eq!(c.buffered(), 0);
    }

    #[test]
    fn test_buffered_mismatches_are_dropped_on_resolve() {
        let mut c = Correlator::new(Mode::PerRun);
        let _ = c.observe(EventKind::Completed, record("runCompleted", Some("T999"), Some(true)));

        let verdicts = c.resolve_token("T123".into());
        assert!(verdicts.is_empty());
    }

    #[test]
    fn test_event_without_token_never_matches_per_run() {
        let mut c = Correlator::new(Mode::PerRun);
        let _ = c.resolve_token("T1".into());

        let v = c.observe(EventKind::Completed, record("runCompleted", None, Some(true)));
        assert_eq!(v, Verdict::Ignored);
    }

    #[test]
    fn test_shared_mode_matches_by_name_only() {
        let mut c = Correlator::new(Mode::Shared);

        let v = c.observe(EventKind::Started, record("runStarted", Some("whatever"), None));
        assert!(matches!(v, Verdict::Progress(_)));

        // token is irrelevant, even absent
        let v = c.observe(EventKind::Completed, record("runCompleted", None, Some(true)));
        assert!(matches!(v, Verdict::Terminal(_)));
    }

    #[test]
    fn test_shared_mode_ignores_resolve_token() {
        let mut c = Correlator::new(Mode::Shared);
        assert!(c.resolve_token("T1".into()).is_empty());
        assert_eq!(c.token(), None);
    }

    #[test]
    fn test_resolve_token_is_single_assignment() {
        let mut c = Correlator::new(Mode::PerRun);
        let _ = c.resolve_token("T1".into());
        let _ = c.resolve_token("T2".into());
        assert_eq!(c.token(), Some("T1"));
    }
}
