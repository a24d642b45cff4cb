use tokio::{
    sync::broadcast::error::RecvError,
    task::JoinHandle,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    services::session_service,
    state::{SessionUpdate, SharedState, session::Flag},
};

/// Full ordered flag list of a session, tagged with the store version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagSnapshot {
    /// Session version the ledger was read at.
    pub version: u64,
    /// Every flag ordered by reveal position.
    pub flags: Vec<Flag>,
}

/// Handle to a running subscription. Dropping it cancels delivery.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop delivering updates. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}

    /// Whether the delivery task already ended (stream closed or cancelled).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Deliver every session-record update of `session_id` to `on_change`, one at a time.
///
/// Delivery ends after [`SessionUpdate::Closed`]. Missed updates are skipped:
/// each update carries a full snapshot, so the next one supersedes them.
pub fn subscribe_session<F>(state: &SharedState, session_id: Uuid, mut on_change: F) -> Subscription
where
    F: FnMut(SessionUpdate) + Send + 'static,
{
    let mut receiver = state.hub().subscribe_session(session_id);
    let task = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(update) => {
                    let closed = matches!(update, SessionUpdate::Closed { .. });
                    on_change(update);
                    if closed {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(%session_id, skipped, "session subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
    Subscription { task }
}

/// Deliver the full ordered flag list of `session_id` to `on_change` after
/// every flag-collection change.
///
/// Notices carry no flags; the ledger is re-fetched each time, so a lagging
/// subscriber still converges on the latest state.
pub fn subscribe_flags<F>(state: &SharedState, session_id: Uuid, mut on_change: F) -> Subscription
where
    F: FnMut(FlagSnapshot) + Send + 'static,
{
    let mut receiver = state.hub().subscribe_flags(session_id);
    let state = state.clone();
    let task = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(%session_id, skipped, "flag subscriber lagged; re-fetching");
                }
                Err(RecvError::Closed) => break,
            }

            match session_service::load_state(&state, session_id).await {
                Ok(Some(current)) => on_change(FlagSnapshot {
                    version: current.session.version,
                    flags: current.ledger.snapshot(),
                }),
                Ok(None) => debug!(%session_id, "session gone while re-fetching flags"),
                Err(err) => warn!(%session_id, error = %err, "failed to re-fetch flags"),
            }
        }
    });
    Subscription { task }
}
