use std::{future::Future, sync::Arc, time::SystemTime};

use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::SessionEntity,
        session_store::SessionStore,
        storage::{StorageError, WriteOutcome},
    },
    error::ServiceError,
    services::room_code,
    state::{
        SharedState,
        session::{Flag, ImageRef, Session, Side},
        state_machine::{SessionEvent, SessionState, Transition},
    },
};

/// Open a new session hosted by `host_participant`, regenerating the room code
/// when the store reports a collision.
pub async fn create_session(
    state: &SharedState,
    theme: String,
    host_participant: String,
) -> Result<Session, ServiceError> {
    let theme = theme.trim().to_owned();
    if theme.is_empty() {
        return Err(ServiceError::InvalidInput("theme must not be empty".into()));
    }
    if host_participant.trim().is_empty() {
        return Err(ServiceError::InvalidInput(
            "host participant must not be empty".into(),
        ));
    }

    bounded(state, async {
        let store = state.require_session_store().await?;
        let config = state.config();

        for attempt in 1..=config.code_attempts {
            let session = Session::new(
                room_code::generate(),
                theme.clone(),
                host_participant.clone(),
                config.session_ttl,
            );
            let entity: SessionEntity = SessionState::new(session.clone()).into();

            match store.insert_session(entity).await {
                Ok(()) => {
                    info!(session_id = %session.id, code = %session.code, "session created");
                    return Ok(session);
                }
                Err(StorageError::DuplicateCode { code }) => {
                    debug!(attempt, %code, "room code collision; regenerating");
                }
                Err(err) => {
                    warn!(error = %err, "failed to insert session");
                    return Err(err.into());
                }
            }
        }

        Err(ServiceError::Contention("room code allocation"))
    })
    .await
}

/// Seat `guest_participant` in the session identified by `code`.
pub async fn join_session(
    state: &SharedState,
    code: &str,
    guest_participant: String,
) -> Result<Session, ServiceError> {
    let Some(code) = room_code::normalize(code) else {
        debug!(code, "join rejected: malformed room code");
        return Err(not_found_code(code));
    };

    let session_id = bounded(state, async {
        let store = state.require_session_store().await?;
        match store.find_session_by_code(code.clone()).await? {
            Some(entity) if entity.expires_at > SystemTime::now() => Ok(entity.id),
            _ => Err(not_found_code(&code)),
        }
    })
    .await?;

    let (current, _) = mutate(
        state,
        session_id,
        SessionEvent::Join {
            guest_id: guest_participant,
        },
    )
    .await?;
    info!(%session_id, "guest joined");
    Ok(current.session)
}

/// Mark `side` as ready.
pub async fn set_ready(
    state: &SharedState,
    session_id: Uuid,
    side: Side,
) -> Result<Session, ServiceError> {
    let (current, _) = mutate(state, session_id, SessionEvent::SetReady { side, ready: true }).await?;
    Ok(current.session)
}

/// Clear the ready mark of `side`. A session already selecting stays selecting.
pub async fn set_unready(
    state: &SharedState,
    session_id: Uuid,
    side: Side,
) -> Result<Session, ServiceError> {
    let (current, _) =
        mutate(state, session_id, SessionEvent::SetReady { side, ready: false }).await?;
    Ok(current.session)
}

/// Submit every flag of `side` at once. Either all flags land together with the
/// submitted mark, or nothing changes.
pub async fn submit_flags(
    state: &SharedState,
    session_id: Uuid,
    side: Side,
    images: Vec<ImageRef>,
) -> Result<Session, ServiceError> {
    let max = state.config().max_flags;
    if images.is_empty() || images.len() > max {
        debug!(%session_id, %side, count = images.len(), "submission rejected: invalid count");
        return Err(ServiceError::InvalidCount {
            count: images.len(),
            max,
        });
    }
    if images.iter().any(|image| image.image_ref.trim().is_empty()) {
        return Err(ServiceError::InvalidInput(
            "image references must not be empty".into(),
        ));
    }

    let count = images.len();
    let (current, _) = mutate(state, session_id, SessionEvent::SubmitFlags { side, images }).await?;
    info!(%session_id, %side, count, "flags submitted");
    Ok(current.session)
}

/// Reveal the lowest unrevealed flag of `side` and hand the turn to the opponent.
pub async fn reveal_next(
    state: &SharedState,
    session_id: Uuid,
    side: Side,
) -> Result<Flag, ServiceError> {
    let (_, transition) = mutate(state, session_id, SessionEvent::RevealNext { side }).await?;
    transition.revealed.ok_or_else(|| {
        ServiceError::InvalidState("reveal committed without a revealed flag".into())
    })
}

/// Hand the turn over when `side` has nothing left to reveal but the opponent does.
pub async fn pass_turn(
    state: &SharedState,
    session_id: Uuid,
    side: Side,
) -> Result<Session, ServiceError> {
    let (current, _) = mutate(state, session_id, SessionEvent::PassTurn { side }).await?;
    debug!(%session_id, %side, "reveal turn passed");
    Ok(current.session)
}

/// Leave the session. The host deletes it for both parties; the guest frees its seat.
///
/// Leaving is always accepted, including for sessions that are already gone.
pub async fn leave_session(
    state: &SharedState,
    session_id: Uuid,
    side: Side,
) -> Result<(), ServiceError> {
    match side {
        Side::Host => {
            let deleted = bounded(state, async {
                let store = state.require_session_store().await?;
                Ok::<_, ServiceError>(store.delete_session(session_id).await?)
            })
            .await?;
            state.hub().close(session_id);
            info!(%session_id, deleted, "host left; session closed");
            Ok(())
        }
        Side::Guest => match mutate(state, session_id, SessionEvent::GuestLeft).await {
            Ok(_) => {
                info!(%session_id, "guest left");
                Ok(())
            }
            Err(ServiceError::NotFound(_)) => {
                debug!(%session_id, "guest left a session that no longer exists");
                Ok(())
            }
            Err(err) => Err(err),
        },
    }
}

/// Current session record, or `None` when it does not exist or has expired.
pub async fn get_session(
    state: &SharedState,
    session_id: Uuid,
) -> Result<Option<Session>, ServiceError> {
    Ok(load_state(state, session_id)
        .await?
        .map(|current| current.session))
}

/// Every flag of the session ordered by reveal position, host before guest on ties.
pub async fn get_flags(state: &SharedState, session_id: Uuid) -> Result<Vec<Flag>, ServiceError> {
    load_state(state, session_id)
        .await?
        .map(|current| current.ledger.snapshot())
        .ok_or_else(|| not_found_session(session_id))
}

/// Session record together with its ledger, or `None` when missing or expired.
pub async fn load_state(
    state: &SharedState,
    session_id: Uuid,
) -> Result<Option<SessionState>, ServiceError> {
    bounded(state, async {
        let store = state.require_session_store().await?;
        let entity = find_active(store.as_ref(), session_id).await?;
        Ok::<_, ServiceError>(entity.map(SessionState::from))
    })
    .await
}

/// Read, apply and conditionally write back `event`, retrying on concurrent updates.
///
/// Committed changes are published on the hub; a rejected event leaves the
/// stored document untouched.
async fn mutate(
    state: &SharedState,
    session_id: Uuid,
    event: SessionEvent,
) -> Result<(SessionState, Transition), ServiceError> {
    let event_name = event.name();
    let (current, transition, committed) = bounded(state, async {
        let store: Arc<dyn SessionStore> = state.require_session_store().await?;
        let attempts = state.config().write_attempts;

        for attempt in 1..=attempts {
            let Some(entity) = find_active(store.as_ref(), session_id).await? else {
                return Err(not_found_session(session_id));
            };
            let expected = entity.version;
            let before: SessionState = entity.into();
            let mut current = before.clone();
            let now = SystemTime::now();

            let transition = current.apply(event.clone(), now).map_err(|err| {
                debug!(%session_id, event = event_name, error = %err, "event rejected");
                ServiceError::from(err)
            })?;

            if current == before {
                return Ok((current, transition, false));
            }

            current.session.version = expected + 1;
            current.session.updated_at = now;

            match store
                .replace_session(current.clone().into(), expected)
                .await?
            {
                WriteOutcome::Applied => return Ok((current, transition, true)),
                WriteOutcome::Stale => {
                    debug!(%session_id, event = event_name, attempt, "concurrent update; retrying");
                }
            }
        }

        warn!(%session_id, event = event_name, attempts, "write retries exhausted");
        Err(ServiceError::Contention(event_name))
    })
    .await?;

    if committed {
        if transition.from != transition.to {
            debug!(
                %session_id,
                from = ?transition.from,
                to = ?transition.to,
                "phase advanced"
            );
        }
        state.hub().publish_session(&current.session);
        if transition.flags_changed {
            state
                .hub()
                .publish_flags(session_id, current.session.version);
        }
    }

    Ok((current, transition))
}

async fn find_active(
    store: &dyn SessionStore,
    session_id: Uuid,
) -> Result<Option<SessionEntity>, ServiceError> {
    let entity = store.find_session(session_id).await?;
    Ok(entity.filter(|entity| entity.expires_at > SystemTime::now()))
}

/// Run `work` under the configured operation timeout.
async fn bounded<T, Fut>(state: &SharedState, work: Fut) -> Result<T, ServiceError>
where
    Fut: Future<Output = Result<T, ServiceError>>,
{
    match state.config().operation_timeout {
        Some(limit) => timeout(limit, work).await.map_err(|_| {
            warn!(timeout_ms = limit.as_millis() as u64, "session operation timed out");
            ServiceError::Timeout
        })?,
        None => work.await,
    }
}

fn not_found_code(code: &str) -> ServiceError {
    ServiceError::NotFound(format!("no session with code `{code}`"))
}

fn not_found_session(session_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("session `{session_id}` not found"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::session_store::MemorySessionStore,
        state::{
            AppState, SessionUpdate,
            session::{FlagSource, Phase},
        },
    };

    async fn app() -> SharedState {
        let state = AppState::new(AppConfig::default());
        state
            .install_session_store(Arc::new(MemorySessionStore::new()))
            .await;
        state
    }

    fn images(names: &[&str]) -> Vec<ImageRef> {
        names
            .iter()
            .map(|name| ImageRef {
                image_ref: format!("https://images.example/{name}.jpg"),
                thumbnail_ref: Some(format!("https://images.example/{name}-small.jpg")),
                source: FlagSource::Search,
            })
            .collect()
    }

    async fn joined(state: &SharedState) -> Session {
        let session = create_session(state, "Song stuck in your head".into(), "host".into())
            .await
            .unwrap();
        join_session(state, &session.code, "guest".into())
            .await
            .unwrap()
    }

    async fn selecting(state: &SharedState) -> Session {
        let session = joined(state).await;
        set_ready(state, session.id, Side::Host).await.unwrap();
        set_ready(state, session.id, Side::Guest).await.unwrap()
    }

    #[tokio::test]
    async fn operations_fail_in_degraded_mode() {
        let state = AppState::new(AppConfig::default());
        let err = create_session(&state, "Theme".into(), "host".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
    }

    #[tokio::test]
    async fn created_session_has_valid_code_and_waits() {
        let state = app().await;
        let session = create_session(&state, "  Dream vacation ".into(), "host".into())
            .await
            .unwrap();

        assert!(room_code::validate(&session.code));
        assert_eq!(session.theme, "Dream vacation");
        assert_eq!(session.phase, Phase::Waiting);
        assert!(session.guest_participant.is_none());
        assert_eq!(
            get_session(&state, session.id).await.unwrap().unwrap().id,
            session.id
        );
    }

    #[tokio::test]
    async fn join_then_third_party_is_full() {
        let state = app().await;
        let session = joined(&state).await;
        assert_eq!(session.phase, Phase::Ready);
        assert_eq!(session.guest_participant.as_deref(), Some("guest"));

        let err = join_session(&state, &session.code, "someone-else".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Full));
    }

    #[tokio::test]
    async fn join_is_case_insensitive_and_rejects_unknown_codes() {
        let state = app().await;
        let session = create_session(&state, "Theme".into(), "host".into())
            .await
            .unwrap();

        let joined = join_session(&state, &session.code.to_lowercase(), "guest".into())
            .await
            .unwrap();
        assert_eq!(joined.id, session.id);

        for code in ["ABC", "ABCDE0", "ZZZZZZ"] {
            let err = join_session(&state, code, "guest".into()).await.unwrap_err();
            assert!(matches!(err, ServiceError::NotFound(_)), "{code}");
        }
    }

    #[tokio::test]
    async fn self_join_leaves_session_unchanged() {
        let state = app().await;
        let session = create_session(&state, "Theme".into(), "host".into())
            .await
            .unwrap();

        let err = join_session(&state, &session.code, "host".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::SelfJoin));
        assert_eq!(get_session(&state, session.id).await.unwrap().unwrap(), session);
    }

    #[tokio::test]
    async fn expired_sessions_are_unreachable() {
        let mut config = AppConfig::default();
        config.session_ttl = Duration::ZERO;
        let state = AppState::new(config);
        state
            .install_session_store(Arc::new(MemorySessionStore::new()))
            .await;

        let session = create_session(&state, "Theme".into(), "host".into())
            .await
            .unwrap();
        assert!(get_session(&state, session.id).await.unwrap().is_none());
        let err = join_session(&state, &session.code, "guest".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn ready_in_either_order_starts_selection_once() {
        let state = app().await;
        let session = joined(&state).await;
        let mut updates = state.hub().subscribe_session(session.id);

        let after_guest = set_ready(&state, session.id, Side::Guest).await.unwrap();
        assert_eq!(after_guest.phase, Phase::Ready);
        let after_host = set_ready(&state, session.id, Side::Host).await.unwrap();
        assert_eq!(after_host.phase, Phase::Selecting);

        let after_unready = set_unready(&state, session.id, Side::Host).await.unwrap();
        assert_eq!(after_unready.phase, Phase::Selecting);
        assert!(!after_unready.host_ready);

        let mut phases = vec![Phase::Ready];
        while let Ok(SessionUpdate::Changed(snapshot)) = updates.try_recv() {
            phases.push(snapshot.phase);
        }
        let entered_selecting = phases
            .windows(2)
            .filter(|pair| pair[0] != Phase::Selecting && pair[1] == Phase::Selecting)
            .count();
        assert_eq!(entered_selecting, 1);
        assert_eq!(phases.last(), Some(&Phase::Selecting));
    }

    #[tokio::test]
    async fn repeated_ready_does_not_bump_version() {
        let state = app().await;
        let session = joined(&state).await;
        let first = set_ready(&state, session.id, Side::Guest).await.unwrap();
        let second = set_ready(&state, session.id, Side::Guest).await.unwrap();
        assert_eq!(first.version, second.version);
    }

    #[tokio::test]
    async fn second_submission_is_rejected_and_ledger_unchanged() {
        let state = app().await;
        let session = selecting(&state).await;

        submit_flags(&state, session.id, Side::Host, images(&["a", "b"]))
            .await
            .unwrap();
        let before = get_flags(&state, session.id).await.unwrap();

        let err = submit_flags(&state, session.id, Side::Host, images(&["c"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadySubmitted(Side::Host)));
        assert_eq!(get_flags(&state, session.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn invalid_counts_are_rejected_without_side_effects() {
        let state = app().await;
        let session = selecting(&state).await;

        let err = submit_flags(&state, session.id, Side::Guest, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCount { count: 0, .. }));

        let err = submit_flags(
            &state,
            session.id,
            Side::Guest,
            images(&["a", "b", "c", "d", "e", "f"]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCount { count: 6, .. }));

        let stored = get_session(&state, session.id).await.unwrap().unwrap();
        assert!(!stored.guest_submitted);
        assert!(get_flags(&state, session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn submitted_flags_round_trip_in_order() {
        let state = app().await;
        let session = selecting(&state).await;
        let submitted = images(&["a", "b", "c"]);

        submit_flags(&state, session.id, Side::Host, submitted.clone())
            .await
            .unwrap();

        let host_flags: Vec<Flag> = get_flags(&state, session.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|flag| flag.owner_is_host)
            .collect();
        assert_eq!(host_flags.len(), 3);
        for ((flag, image), order) in host_flags.iter().zip(&submitted).zip(1u8..) {
            assert_eq!(flag.image_ref, image.image_ref);
            assert_eq!(flag.reveal_order, order);
            assert!(!flag.is_revealed);
        }
    }

    #[tokio::test]
    async fn both_submissions_start_revealing_with_host_turn() {
        let state = app().await;
        let session = selecting(&state).await;
        let mut flag_notices = state.hub().subscribe_flags(session.id);

        submit_flags(&state, session.id, Side::Guest, images(&["x"]))
            .await
            .unwrap();
        let session = submit_flags(&state, session.id, Side::Host, images(&["y", "z"]))
            .await
            .unwrap();

        assert_eq!(session.phase, Phase::Revealing);
        assert_eq!(session.reveal_turn, Side::Host);
        assert!(flag_notices.try_recv().is_ok());
        assert_eq!(flag_notices.try_recv().unwrap().version, session.version);
    }

    #[tokio::test]
    async fn out_of_turn_reveal_changes_nothing() {
        let state = app().await;
        let session = selecting(&state).await;
        submit_flags(&state, session.id, Side::Host, images(&["a"]))
            .await
            .unwrap();
        submit_flags(&state, session.id, Side::Guest, images(&["b"]))
            .await
            .unwrap();
        let before = get_flags(&state, session.id).await.unwrap();

        let err = reveal_next(&state, session.id, Side::Guest)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotYourTurn(Side::Guest)));
        assert_eq!(get_flags(&state, session.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn uneven_submissions_require_passing_the_turn() {
        let state = app().await;
        let session = selecting(&state).await;
        submit_flags(&state, session.id, Side::Host, images(&["h1", "h2", "h3"]))
            .await
            .unwrap();
        submit_flags(
            &state,
            session.id,
            Side::Guest,
            images(&["g1", "g2", "g3", "g4", "g5"]),
        )
        .await
        .unwrap();

        for round in 1..=3u8 {
            let host_flag = reveal_next(&state, session.id, Side::Host).await.unwrap();
            assert!(host_flag.owner_is_host);
            assert_eq!(host_flag.reveal_order, round);
            let guest_flag = reveal_next(&state, session.id, Side::Guest).await.unwrap();
            assert_eq!(guest_flag.reveal_order, round);
        }

        let err = reveal_next(&state, session.id, Side::Host)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NothingToReveal(Side::Host)));
        let flags = get_flags(&state, session.id).await.unwrap();
        assert_eq!(flags.iter().filter(|flag| !flag.is_revealed).count(), 2);
        assert!(!crate::state::flag_ledger::is_complete(&flags));

        pass_turn(&state, session.id, Side::Host).await.unwrap();
        reveal_next(&state, session.id, Side::Guest).await.unwrap();
        pass_turn(&state, session.id, Side::Host).await.unwrap();
        reveal_next(&state, session.id, Side::Guest).await.unwrap();

        let current = load_state(&state, session.id).await.unwrap().unwrap();
        assert_eq!(current.observed_phase(), Phase::Finished);
    }

    #[tokio::test]
    async fn concurrent_reveals_never_double_reveal() {
        let state = app().await;
        let session = selecting(&state).await;
        submit_flags(&state, session.id, Side::Host, images(&["a", "b"]))
            .await
            .unwrap();
        submit_flags(&state, session.id, Side::Guest, images(&["c", "d"]))
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            reveal_next(&state, session.id, Side::Host),
            reveal_next(&state, session.id, Side::Host)
        );
        let successes = [first.is_ok(), second.is_ok()]
            .into_iter()
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);

        let revealed = get_flags(&state, session.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|flag| flag.is_revealed)
            .count();
        assert_eq!(revealed, 1);
    }

    #[tokio::test]
    async fn host_leaving_deletes_session_and_closes_streams() {
        let state = app().await;
        let session = selecting(&state).await;
        let mut updates = state.hub().subscribe_session(session.id);

        leave_session(&state, session.id, Side::Host).await.unwrap();

        assert!(get_session(&state, session.id).await.unwrap().is_none());
        assert_eq!(
            updates.recv().await.unwrap(),
            SessionUpdate::Closed {
                session_id: session.id
            }
        );
        leave_session(&state, session.id, Side::Guest).await.unwrap();
    }

    #[tokio::test]
    async fn guest_leaving_resets_only_guest_fields() {
        let state = app().await;
        let session = joined(&state).await;
        set_ready(&state, session.id, Side::Host).await.unwrap();

        leave_session(&state, session.id, Side::Guest).await.unwrap();

        let session = get_session(&state, session.id).await.unwrap().unwrap();
        assert_eq!(session.phase, Phase::Waiting);
        assert!(session.guest_participant.is_none());
        assert!(!session.guest_ready);
        assert!(session.host_ready);

        let rejoined = join_session(&state, &session.code, "another-guest".into())
            .await
            .unwrap();
        assert_eq!(rejoined.phase, Phase::Ready);
    }

    #[tokio::test]
    async fn guest_leaving_after_submitting_discards_guest_flags() {
        let state = app().await;
        let session = selecting(&state).await;
        submit_flags(&state, session.id, Side::Host, images(&["h1", "h2"]))
            .await
            .unwrap();
        let revealing = submit_flags(&state, session.id, Side::Guest, images(&["g1"]))
            .await
            .unwrap();
        assert!(revealing.guest_submitted);
        let mut flag_notices = state.hub().subscribe_flags(session.id);

        leave_session(&state, session.id, Side::Guest).await.unwrap();

        let session = get_session(&state, session.id).await.unwrap().unwrap();
        assert_eq!(session.phase, Phase::Waiting);
        assert!(!session.guest_submitted);
        assert!(session.host_submitted);
        let flags = get_flags(&state, session.id).await.unwrap();
        assert_eq!(flags.len(), 2);
        assert!(flags.iter().all(|flag| flag.owner() == Side::Host));
        assert_eq!(flag_notices.try_recv().unwrap().version, session.version);
    }

    #[tokio::test]
    async fn operations_on_missing_sessions_are_not_found() {
        let state = app().await;
        let err = set_ready(&state, Uuid::new_v4(), Side::Host)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(matches!(
            get_flags(&state, Uuid::new_v4()).await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }
}
