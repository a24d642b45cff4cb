//! Participant-side mirror of one session, kept current from the hub streams.

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::ServiceError,
    services::{
        session_service,
        subscription::{self, FlagSnapshot, Subscription},
    },
    state::{
        SessionUpdate, SharedState,
        session::{Flag, Phase, Session, Side},
        state_machine,
    },
};

/// Everything a participant's screen needs, derived from the latest session
/// record and flag list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorView {
    /// Side of the local participant.
    pub side: Side,
    /// Latest session record (the last known one once closed).
    pub session: Option<Session>,
    /// Phase derived from the data, `Finished` included.
    pub phase: Option<Phase>,
    /// Local readiness.
    pub i_am_ready: bool,
    /// Opponent readiness.
    pub opponent_ready: bool,
    /// Local submission.
    pub i_submitted: bool,
    /// Opponent submission.
    pub opponent_submitted: bool,
    /// Whether the other seat is occupied.
    pub opponent_present: bool,
    /// Whether the local participant may reveal now.
    pub is_my_turn: bool,
    /// Turn is local, nothing is left locally and the opponent still has flags.
    pub must_pass_turn: bool,
    /// Local flags in reveal order.
    pub my_flags: Vec<Flag>,
    /// Opponent flags in reveal order.
    pub opponent_flags: Vec<Flag>,
    /// The host left and the session is gone.
    pub closed: bool,
}

/// Pure projection of a session record and flag list onto `side`'s point of view.
pub fn derive_view(
    side: Side,
    session: Option<&Session>,
    flags: &[Flag],
    flags_version: u64,
    closed: bool,
) -> MirrorView {
    let (my_flags, opponent_flags): (Vec<Flag>, Vec<Flag>) =
        flags.iter().cloned().partition(|flag| flag.owner() == side);

    let Some(session) = session else {
        return MirrorView {
            side,
            session: None,
            phase: None,
            i_am_ready: false,
            opponent_ready: false,
            i_submitted: false,
            opponent_submitted: false,
            opponent_present: false,
            is_my_turn: false,
            must_pass_turn: false,
            my_flags,
            opponent_flags,
            closed,
        };
    };

    let phase = state_machine::observed_phase(session, flags, flags_version);
    let flags_current = flags_version >= session.version;
    let opponent = side.opponent();
    let is_my_turn = phase == Phase::Revealing && session.reveal_turn == side && !closed;
    let my_remaining = my_flags.iter().filter(|flag| !flag.is_revealed).count();
    let opponent_remaining = opponent_flags.iter().filter(|flag| !flag.is_revealed).count();

    MirrorView {
        side,
        session: Some(session.clone()),
        phase: Some(phase),
        i_am_ready: session.is_ready(side),
        opponent_ready: session.is_ready(opponent),
        i_submitted: session.has_submitted(side) || (flags_current && !my_flags.is_empty()),
        opponent_submitted: session.has_submitted(opponent)
            || (flags_current && !opponent_flags.is_empty()),
        opponent_present: session.participant(opponent).is_some(),
        is_my_turn,
        must_pass_turn: is_my_turn && my_remaining == 0 && opponent_remaining > 0,
        my_flags,
        opponent_flags,
        closed,
    }
}

enum MirrorInput {
    Session(SessionUpdate),
    Flags(FlagSnapshot),
}

#[derive(Default)]
struct MirrorData {
    session: Option<Session>,
    flags: Vec<Flag>,
    flags_version: u64,
    closed: bool,
}

impl MirrorData {
    /// Fold one input in, returning whether anything changed.
    fn apply(&mut self, input: MirrorInput) -> bool {
        match input {
            MirrorInput::Session(SessionUpdate::Changed(session)) => {
                if self.closed
                    || self
                        .session
                        .as_ref()
                        .is_some_and(|current| current.version >= session.version)
                {
                    return false;
                }
                self.session = Some(session);
                true
            }
            MirrorInput::Session(SessionUpdate::Closed { .. }) => {
                let changed = !self.closed;
                self.closed = true;
                changed
            }
            MirrorInput::Flags(snapshot) => {
                if self.closed || snapshot.version < self.flags_version {
                    return false;
                }
                self.flags_version = snapshot.version;
                self.flags = snapshot.flags;
                true
            }
        }
    }
}

/// Live view of one session for one participant.
///
/// Both streams feed a single queue drained by one writer task, so updates
/// are folded in strictly one at a time.
pub struct SessionMirror {
    session_id: Uuid,
    view: watch::Receiver<MirrorView>,
    _session_updates: Subscription,
    _flag_updates: Subscription,
    writer: JoinHandle<()>,
}

impl SessionMirror {
    /// Subscribe to `session_id` as `side` and load the initial snapshot.
    pub async fn attach(
        state: &SharedState,
        session_id: Uuid,
        side: Side,
    ) -> Result<Self, ServiceError> {
        let (inputs, mut queue) = mpsc::unbounded_channel::<MirrorInput>();

        let session_inputs = inputs.clone();
        let session_updates = subscription::subscribe_session(state, session_id, move |update| {
            let _ = session_inputs.send(MirrorInput::Session(update));
        });
        let flag_inputs = inputs.clone();
        let flag_updates = subscription::subscribe_flags(state, session_id, move |snapshot| {
            let _ = flag_inputs.send(MirrorInput::Flags(snapshot));
        });

        let initial = session_service::load_state(state, session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))?;

        let mut data = MirrorData::default();
        let version = initial.session.version;
        data.apply(MirrorInput::Flags(FlagSnapshot {
            version,
            flags: initial.ledger.snapshot(),
        }));
        data.apply(MirrorInput::Session(SessionUpdate::Changed(initial.session)));
        drop(inputs);

        let (view_tx, view) = watch::channel(derive_view(
            side,
            data.session.as_ref(),
            &data.flags,
            data.flags_version,
            data.closed,
        ));

        let writer = tokio::spawn(async move {
            while let Some(input) = queue.recv().await {
                if data.apply(input) {
                    let next = derive_view(
                        side,
                        data.session.as_ref(),
                        &data.flags,
                        data.flags_version,
                        data.closed,
                    );
                    if view_tx.send(next).is_err() {
                        break;
                    }
                }
            }
            debug!(%session_id, "session mirror detached");
        });

        Ok(Self {
            session_id,
            view,
            _session_updates: session_updates,
            _flag_updates: flag_updates,
            writer,
        })
    }

    /// Session this mirror follows.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Latest derived view.
    pub fn current(&self) -> MirrorView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view change.
    pub fn watch(&self) -> watch::Receiver<MirrorView> {
        self.view.clone()
    }

    /// Wait until `predicate` holds for the view, returning that view.
    pub async fn wait_for<P>(&self, mut predicate: P) -> Option<MirrorView>
    where
        P: FnMut(&MirrorView) -> bool,
    {
        let mut view = self.view.clone();
        view.wait_for(|current| predicate(current))
            .await
            .ok()
            .map(|current| current.clone())
    }
}

impl Drop for SessionMirror {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration, time::SystemTime};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::session_store::MemorySessionStore,
        state::{
            AppState,
            session::{FlagSource, ImageRef},
        },
    };

    fn session() -> Session {
        let mut session = Session::new(
            "ABCDEF".into(),
            "Theme".into(),
            "host".into(),
            Duration::from_secs(60),
        );
        session.guest_participant = Some("guest".into());
        session.phase = Phase::Revealing;
        session.host_submitted = true;
        session.guest_submitted = true;
        session
    }

    fn flag(owner: Side, order: u8, revealed: bool) -> Flag {
        Flag {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            owner_is_host: owner.is_host(),
            image_ref: format!("{owner}-{order}"),
            thumbnail_ref: None,
            source: FlagSource::Library,
            reveal_order: order,
            is_revealed: revealed,
            created_at: SystemTime::now(),
        }
    }

    #[test]
    fn view_partitions_flags_and_flags_pass_obligation() {
        let session = session();
        let flags = vec![
            flag(Side::Host, 1, true),
            flag(Side::Guest, 1, true),
            flag(Side::Guest, 2, false),
        ];

        let host = derive_view(Side::Host, Some(&session), &flags, session.version, false);
        assert_eq!(host.phase, Some(Phase::Revealing));
        assert_eq!(host.my_flags.len(), 1);
        assert_eq!(host.opponent_flags.len(), 2);
        assert!(host.is_my_turn);
        assert!(host.must_pass_turn);

        let guest = derive_view(Side::Guest, Some(&session), &flags, session.version, false);
        assert!(!guest.is_my_turn);
        assert!(!guest.must_pass_turn);
    }

    #[test]
    fn flags_older_than_the_record_do_not_count() {
        let mut session = session();
        session.phase = Phase::Selecting;
        session.host_submitted = false;
        session.guest_submitted = false;
        session.version = 9;
        let leftover = vec![flag(Side::Host, 1, false), flag(Side::Guest, 1, false)];

        let view = derive_view(Side::Host, Some(&session), &leftover, 5, false);
        assert_eq!(view.phase, Some(Phase::Selecting));
        assert!(!view.i_submitted);
        assert!(!view.opponent_submitted);

        let view = derive_view(Side::Host, Some(&session), &leftover, 9, false);
        assert_eq!(view.phase, Some(Phase::Revealing));
        assert!(view.opponent_submitted);
    }

    #[test]
    fn stale_snapshots_are_ignored() {
        let mut data = MirrorData::default();
        let mut newer = session();
        newer.version = 4;
        let mut older = newer.clone();
        older.version = 3;
        older.phase = Phase::Selecting;

        assert!(data.apply(MirrorInput::Session(SessionUpdate::Changed(newer.clone()))));
        assert!(!data.apply(MirrorInput::Session(SessionUpdate::Changed(older))));
        assert_eq!(data.session, Some(newer));

        assert!(data.apply(MirrorInput::Flags(FlagSnapshot {
            version: 4,
            flags: vec![flag(Side::Host, 1, false)],
        })));
        assert!(!data.apply(MirrorInput::Flags(FlagSnapshot {
            version: 2,
            flags: Vec::new(),
        })));
        assert_eq!(data.flags.len(), 1);
    }

    #[tokio::test]
    async fn mirror_follows_both_streams() {
        let state = AppState::new(AppConfig::default());
        state
            .install_session_store(Arc::new(MemorySessionStore::new()))
            .await;
        let created = session_service::create_session(&state, "Theme".into(), "host".into())
            .await
            .unwrap();
        let mirror = SessionMirror::attach(&state, created.id, Side::Host)
            .await
            .unwrap();
        assert_eq!(mirror.current().phase, Some(Phase::Waiting));
        assert!(!mirror.current().opponent_present);

        session_service::join_session(&state, &created.code, "guest".into())
            .await
            .unwrap();
        session_service::set_ready(&state, created.id, Side::Host).await.unwrap();
        session_service::set_ready(&state, created.id, Side::Guest).await.unwrap();
        for side in [Side::Host, Side::Guest] {
            session_service::submit_flags(
                &state,
                created.id,
                side,
                vec![ImageRef {
                    image_ref: format!("{side}.jpg"),
                    thumbnail_ref: None,
                    source: FlagSource::Search,
                }],
            )
            .await
            .unwrap();
        }

        let view = tokio::time::timeout(
            Duration::from_secs(1),
            mirror.wait_for(|view| view.phase == Some(Phase::Revealing) && view.my_flags.len() == 1),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(view.opponent_present);
        assert!(view.is_my_turn);

        session_service::leave_session(&state, created.id, Side::Host)
            .await
            .unwrap();
        let view = tokio::time::timeout(Duration::from_secs(1), mirror.wait_for(|view| view.closed))
            .await
            .unwrap()
            .unwrap();
        assert!(!view.is_my_turn);
    }
}
