//! Trigger orchestrator
//!
//! Runs the externally-supplied triggering action concurrently with the
//! receive loop. The action is launched only after subscriptions are
//! registered, so no event can arrive before the multiplexer has routing
//! entries for it. Its result - the correlation token - is published
//! through a single-assignment watch cell; its failures are caught and
//! logged here and never reach the receive loop's control flow.

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::correlate::CorrelationToken;
use crate::error::VigilError;

/// Handle to a launched trigger action.
pub struct TriggerHandle {
    rx: watch::Receiver<Option<CorrelationToken>>,
    task: Option<JoinHandle<()>>,
}

/// Launch the triggering action on its own task.
///
/// The action resolves to the run's correlation token, or `None` for
/// workflows that do not correlate per run. An `Err` is logged exactly
/// once as a trigger failure; the watch cell then closes without a value
/// and the receive loop keeps listening.
pub fn spawn<F>(action: F) -> TriggerHandle
where
    F: Future<Output = Result<Option<CorrelationToken>, VigilError>> + Send + 'static,
{
    let (tx, rx) = watch::channel(None);
    let task = tokio::spawn(async move {
        match action.await {
            Ok(Some(token)) => {
                debug!(token = %token, "trigger action produced correlation token");
                let _ = tx.send(Some(token));
            }
            Ok(None) => {
                debug!("trigger action finished without a correlation token");
            }
            Err(e) => {
                error!(error = %e, "trigger action failed; continuing to listen");
            }
        }
    });
    TriggerHandle {
        rx,
        task: Some(task),
    }
}

/// Handle for sessions that listen without triggering anything.
pub fn idle() -> TriggerHandle {
    let (tx, rx) = watch::channel(None);
    drop(tx);
    TriggerHandle { rx, task: None }
}

impl TriggerHandle {
    /// Receiver for the eventually-published token. `changed()` errors
    /// once the action finished without publishing one.
    pub fn subscribe(&self) -> watch::Receiver<Option<CorrelationToken>> {
        self.rx.clone()
    }

    /// Stop the action if it is still in flight.
    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_is_published_once() {
        let handle = spawn(async { Ok(Some("T123".to_string())) });
        let mut rx = handle.subscribe();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_deref(), Some("T123"));

        // Sender is dropped after publishing; the next wait reports closure.
        assert!(rx.changed().await.is_err());
    }

    #[tokio::test]
    async fn test_failure_closes_cell_without_value() {
        let handle = spawn(async { Err(VigilError::Trigger("boom".into())) });
        let mut rx = handle.subscribe();

        // No value is ever published; the channel just closes.
        assert!(rx.changed().await.is_err());
        assert!(rx.borrow().is_none());
    }

    #[tokio::test]
    async fn test_action_without_token_closes_cell() {
        let handle = spawn(async { Ok(None) });
        let mut rx = handle.subscribe();
        assert!(rx.changed().await.is_err());
        assert!(rx.borrow().is_none());
    }

    #[tokio::test]
    async fn test_idle_handle_is_already_closed() {
        let handle = idle();
        let mut rx = handle.subscribe();
        assert!(rx.changed().await.is_err());
    }
}
