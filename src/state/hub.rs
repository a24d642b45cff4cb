use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::state::session::Session;

/// Update carried on a session-record stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Full snapshot of the record after a committed mutation.
    Changed(Session),
    /// The host left and the session no longer exists.
    Closed {
        /// Identifier of the deleted session.
        session_id: Uuid,
    },
}

/// Notice carried on a flag-collection stream. It deliberately carries no
/// flags: receivers re-fetch the whole ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagsChanged {
    /// Session whose ledger changed.
    pub session_id: Uuid,
    /// Store version that produced the change.
    pub version: u64,
}

struct SessionChannels {
    session: broadcast::Sender<SessionUpdate>,
    flags: broadcast::Sender<FlagsChanged>,
}

impl SessionChannels {
    fn new(capacity: usize) -> Self {
        let (session, _) = broadcast::channel(capacity);
        let (flags, _) = broadcast::channel(capacity);
        Self { session, flags }
    }

    fn receiver_count(&self) -> usize {
        self.session.receiver_count() + self.flags.receiver_count()
    }
}

/// Fan-out of per-session change notifications, keyed by session id.
///
/// Channels are created lazily by the first subscriber; publishing to a
/// session nobody listens to is a no-op.
pub struct SessionHub {
    channels: DashMap<Uuid, SessionChannels>,
    capacity: usize,
}

impl SessionHub {
    /// Construct a hub whose per-session channels buffer `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Register for session-record updates of `session_id`.
    pub fn subscribe_session(&self, session_id: Uuid) -> broadcast::Receiver<SessionUpdate> {
        self.channels
            .entry(session_id)
            .or_insert_with(|| SessionChannels::new(self.capacity))
            .session
            .subscribe()
    }

    /// Register for flag-collection notices of `session_id`.
    pub fn subscribe_flags(&self, session_id: Uuid) -> broadcast::Receiver<FlagsChanged> {
        self.channels
            .entry(session_id)
            .or_insert_with(|| SessionChannels::new(self.capacity))
            .flags
            .subscribe()
    }

    /// Broadcast a committed session snapshot.
    pub fn publish_session(&self, session: &Session) {
        if let Some(channels) = self.channels.get(&session.id) {
            let _ = channels
                .session
                .send(SessionUpdate::Changed(session.clone()));
        }
    }

    /// Broadcast that the flag ledger of `session_id` changed.
    pub fn publish_flags(&self, session_id: Uuid, version: u64) {
        if let Some(channels) = self.channels.get(&session_id) {
            let _ = channels.flags.send(FlagsChanged {
                session_id,
                version,
            });
        }
    }

    /// Announce deletion, then drop the channels so receivers observe the end of stream.
    pub fn close(&self, session_id: Uuid) {
        if let Some((_, channels)) = self.channels.remove(&session_id) {
            let _ = channels.session.send(SessionUpdate::Closed { session_id });
        }
    }

    /// Forget channels nobody listens to any more, returning how many were dropped.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels
            .retain(|_, channels| channels.receiver_count() > 0);
        before.saturating_sub(self.channels.len())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn session() -> Session {
        Session::new(
            "ABCDEF".into(),
            "Food that describes your personality".into(),
            "host".into(),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn subscribers_receive_snapshots_and_close() {
        let hub = SessionHub::new(8);
        let session = session();
        let mut updates = hub.subscribe_session(session.id);
        let mut flags = hub.subscribe_flags(session.id);

        hub.publish_session(&session);
        hub.publish_flags(session.id, 3);
        hub.close(session.id);

        assert_eq!(
            updates.recv().await.unwrap(),
            SessionUpdate::Changed(session.clone())
        );
        assert_eq!(flags.recv().await.unwrap().version, 3);
        assert_eq!(
            updates.recv().await.unwrap(),
            SessionUpdate::Closed {
                session_id: session.id
            }
        );
        assert!(matches!(
            updates.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[test]
    fn prune_drops_abandoned_channels() {
        let hub = SessionHub::new(8);
        let kept = session();
        let dropped = session();
        let _receiver = hub.subscribe_session(kept.id);
        drop(hub.subscribe_flags(dropped.id));

        assert_eq!(hub.prune(), 1);
        hub.publish_session(&kept);
    }
}
