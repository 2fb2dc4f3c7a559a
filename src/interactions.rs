//! Time-bounded watcher for interactive components on delivered messages.
//!
//! Each dispatched notification gets one watcher. It forwards activations to
//! a handler, reports handler failures back to the acting user instead of
//! crashing, and strips ephemeral components from the message once the
//! timeout expires so stale buttons don't linger.

use crate::gateway::{ComponentAction, ComponentRow, MessageHandle};
use futures::StreamExt as _;
use std::future::Future;
use std::time::Duration;

/// Watcher lifecycle. Once expired there is no way back to listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Listening for activations.
    Active,
    /// Timeout fired; cleanup attempted.
    Expired,
    /// Finished, either after cleanup or because the action stream ended.
    Done,
}

/// Watch `message` for component activations until `timeout` elapses.
///
/// `on_activate` runs for every action. `Ok(Some(text))` is acknowledged
/// ephemerally to the acting user, `Ok(None)` stays silent, and `Err` is
/// caught, logged, and reported to the user; the watcher keeps listening
/// either way. After the timeout, components whose id is in `ephemeral_ids`
/// are removed from the message; id-less link components always survive.
///
/// Spawns a background task. The returned handle is mainly for tests; the
/// dispatcher fires and forgets.
pub fn watch<F, Fut>(
    message: Box<dyn MessageHandle>,
    timeout: Duration,
    on_activate: F,
    ephemeral_ids: Vec<String>,
) -> tokio::task::JoinHandle<WatchState>
where
    F: Fn(ComponentAction) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
{
    tokio::spawn(run_watch(message, timeout, on_activate, ephemeral_ids))
}

async fn run_watch<F, Fut>(
    mut message: Box<dyn MessageHandle>,
    timeout: Duration,
    on_activate: F,
    ephemeral_ids: Vec<String>,
) -> WatchState
where
    F: Fn(ComponentAction) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
{
    let deadline = tokio::time::Instant::now() + timeout;
    let mut actions = message.actions();
    let mut state = WatchState::Active;

    while state == WatchState::Active {
        match tokio::time::timeout_at(deadline, actions.next()).await {
            Ok(Some(action)) => match on_activate(action.clone()).await {
                Ok(Some(reply)) => {
                    if let Err(error) = message.acknowledge(&action, &reply).await {
                        tracing::debug!(%error, "failed to acknowledge interaction");
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        component_id = %action.component_id,
                        user_id = %action.user_id,
                        %error,
                        "interaction handler failed"
                    );
                    if let Err(ack_error) = message
                        .acknowledge(&action, "❌ Interaction Handler Error.")
                        .await
                    {
                        tracing::debug!(%ack_error, "failed to report handler error");
                    }
                }
            },
            Ok(None) => {
                // Message gone or the gateway dropped the stream; nothing
                // left to clean up.
                return WatchState::Done;
            }
            Err(_) => state = WatchState::Expired,
        }
    }

    drop(actions);

    // Cleanup phase. Failures here (message deleted, permissions revoked)
    // are swallowed.
    if !ephemeral_ids.is_empty() {
        match message.components().await {
            Ok(rows) => {
                let stripped = strip_ephemeral(rows, &ephemeral_ids);
                if let Err(error) = message.set_components(stripped).await {
                    tracing::debug!(%error, "component cleanup failed");
                }
            }
            Err(error) => {
                tracing::debug!(%error, "could not re-fetch message for cleanup");
            }
        }
    }

    WatchState::Done
}

/// Remove components whose id is in `ephemeral_ids`. Id-less components are
/// kept, and rows left empty are dropped entirely.
pub fn strip_ephemeral(rows: Vec<ComponentRow>, ephemeral_ids: &[String]) -> Vec<ComponentRow> {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .filter(|component| {
                    component
                        .id()
                        .is_none_or(|id| !ephemeral_ids.iter().any(|e| e == id))
                })
                .collect::<ComponentRow>()
        })
        .filter(|row| !row.is_empty())
        .collect()
}
