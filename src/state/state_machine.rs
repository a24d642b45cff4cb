use std::time::SystemTime;

use thiserror::Error;

use crate::state::{
    flag_ledger::{self, FlagLedger, LedgerError},
    session::{Flag, ImageRef, Phase, Session, Side},
};

/// Events that can be applied to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A second participant joins with the room code.
    Join {
        /// Identifier of the joining participant.
        guest_id: String,
    },
    /// A side sets or clears its ready flag.
    SetReady {
        /// Side toggling readiness.
        side: Side,
        /// New readiness value.
        ready: bool,
    },
    /// A side submits its flags.
    SubmitFlags {
        /// Submitting side.
        side: Side,
        /// Images in reveal order.
        images: Vec<ImageRef>,
    },
    /// A side reveals its next flag.
    RevealNext {
        /// Revealing side.
        side: Side,
    },
    /// A side with nothing left to reveal hands the turn over.
    PassTurn {
        /// Side giving up its turn.
        side: Side,
    },
    /// The guest leaves; the host keeps the room.
    GuestLeft,
}

impl SessionEvent {
    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Join { .. } => "join",
            SessionEvent::SetReady { .. } => "set_ready",
            SessionEvent::SubmitFlags { .. } => "submit_flags",
            SessionEvent::RevealNext { .. } => "reveal_next",
            SessionEvent::PassTurn { .. } => "pass_turn",
            SessionEvent::GuestLeft => "guest_left",
        }
    }
}

/// Error returned when an event cannot be applied from the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// The phase the session was in when the event was received.
    pub from: Phase,
    /// Name of the rejected event.
    pub event: &'static str,
}

/// Reasons a session event is rejected. A rejected event leaves the state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// Session already has a guest.
    #[error("session already has a guest")]
    Full,
    /// Host attempted to join their own session.
    #[error("host cannot join their own session")]
    SelfJoin,
    /// Guest-side operation while no guest is seated.
    #[error("no guest has joined this session")]
    GuestAbsent,
    /// Side submitted twice.
    #[error("{0} already submitted flags")]
    AlreadySubmitted(Side),
    /// Submission outside `1..=5` images.
    #[error("expected between 1 and {max} images, got {count}", max = flag_ledger::MAX_FLAGS)]
    InvalidCount {
        /// Number of images received.
        count: usize,
    },
    /// Reveal or pass attempted by the side not holding the turn.
    #[error("it is not {0}'s turn")]
    NotYourTurn(Side),
    /// Side holds the turn but every one of its flags is already revealed.
    #[error("{0} has nothing left to reveal")]
    NothingToReveal(Side),
    /// Side holds the turn and still has flags, so it may not pass.
    #[error("{0} still has flags to reveal")]
    MustReveal(Side),
    /// Neither side has anything left to reveal.
    #[error("every flag is already revealed")]
    AllRevealed,
    /// Event not valid from the current phase.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

impl From<LedgerError> for TransitionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AlreadySubmitted(side) => TransitionError::AlreadySubmitted(side),
            LedgerError::InvalidCount(count) => TransitionError::InvalidCount { count },
        }
    }
}

/// Result of a successfully applied event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Stored phase before the event.
    pub from: Phase,
    /// Stored phase after the event.
    pub to: Phase,
    /// Whether the flag ledger changed.
    pub flags_changed: bool,
    /// Flag revealed by a `RevealNext` event.
    pub revealed: Option<Flag>,
}

/// Session record together with its flag ledger; the unit of every conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Shared session record.
    pub session: Session,
    /// Both sides' flags.
    pub ledger: FlagLedger,
}

impl SessionState {
    /// Fresh state with an empty ledger.
    pub fn new(session: Session) -> Self {
        let ledger = FlagLedger::new(session.id);
        Self { session, ledger }
    }

    /// Phase as observed by clients, including the derived `Finished`.
    pub fn observed_phase(&self) -> Phase {
        observed_phase(&self.session, &self.ledger.snapshot(), self.session.version)
    }

    /// Apply `event`, validating it against the current phase first.
    pub fn apply(
        &mut self,
        event: SessionEvent,
        now: SystemTime,
    ) -> Result<Transition, TransitionError> {
        let from = self.session.phase;
        let mut flags_changed = false;
        let mut revealed = None;

        match event {
            SessionEvent::Join { guest_id } => {
                if self.session.guest_participant.is_some() {
                    return Err(TransitionError::Full);
                }
                if guest_id == self.session.host_participant {
                    return Err(TransitionError::SelfJoin);
                }
                self.ensure_phase(&[Phase::Waiting], "join")?;
                self.session.guest_participant = Some(guest_id);
                self.session.phase = Phase::Ready;
            }
            SessionEvent::SetReady { side, ready } => {
                self.ensure_seated(side)?;
                self.session.set_ready(side, ready);
                if self.session.phase == Phase::Ready && self.session.both_ready() {
                    self.session.phase = Phase::Selecting;
                }
            }
            SessionEvent::SubmitFlags { side, images } => {
                self.ensure_seated(side)?;
                if self.session.has_submitted(side) {
                    return Err(TransitionError::AlreadySubmitted(side));
                }
                self.ensure_phase(&[Phase::Selecting], "submit_flags")?;
                self.ledger.submit(side, images, now)?;
                self.session.mark_submitted(side);
                flags_changed = true;
                if self.session.both_submitted() {
                    self.session.phase = Phase::Revealing;
                    self.session.reveal_turn = Side::Host;
                }
            }
            SessionEvent::RevealNext { side } => {
                self.ensure_phase(&[Phase::Revealing], "reveal_next")?;
                if self.session.reveal_turn != side {
                    return Err(TransitionError::NotYourTurn(side));
                }
                let flag = self
                    .ledger
                    .reveal_next(side)
                    .ok_or(TransitionError::NothingToReveal(side))?;
                self.session.reveal_turn = side.opponent();
                flags_changed = true;
                revealed = Some(flag);
            }
            SessionEvent::PassTurn { side } => {
                self.ensure_phase(&[Phase::Revealing], "pass_turn")?;
                if self.session.reveal_turn != side {
                    return Err(TransitionError::NotYourTurn(side));
                }
                if self.ledger.remaining(side) > 0 {
                    return Err(TransitionError::MustReveal(side));
                }
                if self.ledger.remaining(side.opponent()) == 0 {
                    return Err(TransitionError::AllRevealed);
                }
                self.session.reveal_turn = side.opponent();
            }
            SessionEvent::GuestLeft => {
                if self.session.guest_participant.is_some() {
                    flags_changed = self.ledger.has_flags(Side::Guest);
                    self.ledger.discard(Side::Guest);
                    self.session.clear_guest();
                }
            }
        }

        Ok(Transition {
            from,
            to: self.session.phase,
            flags_changed,
            revealed,
        })
    }

    fn ensure_phase(&self, allowed: &[Phase], event: &'static str) -> Result<(), TransitionError> {
        if allowed.contains(&self.session.phase) {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.session.phase,
                event,
            }
            .into())
        }
    }

    fn ensure_seated(&self, side: Side) -> Result<(), TransitionError> {
        match self.session.participant(side) {
            Some(_) => Ok(()),
            None => Err(TransitionError::GuestAbsent),
        }
    }
}

/// Re-derive the phase purely from data, whatever order updates arrived in.
///
/// The stored phase is only ever moved forward here: a lagging session record
/// combined with a fresher flag list still yields the later phase. `flags` read
/// at `flags_version` only count when they are at least as new as `session`.
pub fn observed_phase(session: &Session, flags: &[Flag], flags_version: u64) -> Phase {
    let flags_current = flags_version >= session.version;
    let mut phase = session.phase;
    if phase == Phase::Ready && session.both_ready() {
        phase = Phase::Selecting;
    }
    let both_sides_flagged = flags_current
        && flags.iter().any(|flag| flag.owner_is_host)
        && flags.iter().any(|flag| !flag.owner_is_host);
    if phase == Phase::Selecting && (session.both_submitted() || both_sides_flagged) {
        phase = Phase::Revealing;
    }
    if phase == Phase::Revealing && flags_current && flag_ledger::is_complete(flags) {
        phase = Phase::Finished;
    }
    phase
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::state::session::FlagSource;

    fn state() -> SessionState {
        SessionState::new(Session::new(
            "ABCDEF".into(),
            "Villain you secretly like".into(),
            "host-device".into(),
            Duration::from_secs(7200),
        ))
    }

    fn apply(state: &mut SessionState, event: SessionEvent) -> Phase {
        state.apply(event, SystemTime::now()).unwrap().to
    }

    fn images(count: usize) -> Vec<ImageRef> {
        (1..=count)
            .map(|n| ImageRef {
                image_ref: format!("img-{n}"),
                thumbnail_ref: Some(format!("thumb-{n}")),
                source: FlagSource::Library,
            })
            .collect()
    }

    fn revealing(host: usize, guest: usize) -> SessionState {
        let mut sm = state();
        apply(&mut sm, SessionEvent::Join { guest_id: "guest-device".into() });
        apply(&mut sm, SessionEvent::SetReady { side: Side::Host, ready: true });
        apply(&mut sm, SessionEvent::SetReady { side: Side::Guest, ready: true });
        apply(&mut sm, SessionEvent::SubmitFlags { side: Side::Host, images: images(host) });
        apply(&mut sm, SessionEvent::SubmitFlags { side: Side::Guest, images: images(guest) });
        sm
    }

    #[test]
    fn initial_state_is_waiting_without_guest() {
        let sm = state();
        assert_eq!(sm.session.phase, Phase::Waiting);
        assert!(sm.session.guest_participant.is_none());
    }

    #[test]
    fn full_happy_path_through_session() {
        let mut sm = state();

        assert_eq!(
            apply(&mut sm, SessionEvent::Join { guest_id: "guest-device".into() }),
            Phase::Ready
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::SetReady { side: Side::Guest, ready: true }),
            Phase::Ready
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::SetReady { side: Side::Host, ready: true }),
            Phase::Selecting
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::SubmitFlags { side: Side::Host, images: images(2) }),
            Phase::Selecting
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::SubmitFlags { side: Side::Guest, images: images(1) }),
            Phase::Revealing
        );
        assert_eq!(sm.session.reveal_turn, Side::Host);

        apply(&mut sm, SessionEvent::RevealNext { side: Side::Host });
        apply(&mut sm, SessionEvent::RevealNext { side: Side::Guest });
        apply(&mut sm, SessionEvent::RevealNext { side: Side::Host });
        assert_eq!(sm.observed_phase(), Phase::Finished);
        assert_eq!(sm.session.phase, Phase::Revealing);
    }

    #[test]
    fn join_rejections_leave_state_unchanged() {
        let mut sm = state();
        let before = sm.clone();
        assert_eq!(
            sm.apply(SessionEvent::Join { guest_id: "host-device".into() }, SystemTime::now()),
            Err(TransitionError::SelfJoin)
        );
        assert_eq!(sm, before);

        apply(&mut sm, SessionEvent::Join { guest_id: "guest-device".into() });
        assert_eq!(
            sm.apply(SessionEvent::Join { guest_id: "third".into() }, SystemTime::now()),
            Err(TransitionError::Full)
        );
    }

    #[test]
    fn unready_after_selecting_does_not_revert_phase() {
        let mut sm = state();
        apply(&mut sm, SessionEvent::Join { guest_id: "guest-device".into() });
        apply(&mut sm, SessionEvent::SetReady { side: Side::Host, ready: true });
        apply(&mut sm, SessionEvent::SetReady { side: Side::Guest, ready: true });

        let transition = sm
            .apply(SessionEvent::SetReady { side: Side::Host, ready: false }, SystemTime::now())
            .unwrap();
        assert_eq!(transition.from, Phase::Selecting);
        assert_eq!(transition.to, Phase::Selecting);
        assert!(!sm.session.host_ready);
    }

    #[test]
    fn guest_cannot_ready_while_absent() {
        let mut sm = state();
        assert_eq!(
            sm.apply(SessionEvent::SetReady { side: Side::Guest, ready: true }, SystemTime::now()),
            Err(TransitionError::GuestAbsent)
        );
    }

    #[test]
    fn submit_outside_selecting_is_invalid() {
        let mut sm = state();
        let err = sm
            .apply(SessionEvent::SubmitFlags { side: Side::Host, images: images(1) }, SystemTime::now())
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition(InvalidTransition {
                from: Phase::Waiting,
                event: "submit_flags",
            })
        );
    }

    #[test]
    fn out_of_turn_reveal_is_rejected_without_changes() {
        let mut sm = revealing(2, 2);
        let before = sm.clone();
        assert_eq!(
            sm.apply(SessionEvent::RevealNext { side: Side::Guest }, SystemTime::now()),
            Err(TransitionError::NotYourTurn(Side::Guest))
        );
        assert_eq!(sm, before);
    }

    #[test]
    fn exhausted_side_must_pass_instead_of_stalling() {
        let mut sm = revealing(1, 3);
        apply(&mut sm, SessionEvent::RevealNext { side: Side::Host });
        apply(&mut sm, SessionEvent::RevealNext { side: Side::Guest });

        assert_eq!(
            sm.apply(SessionEvent::RevealNext { side: Side::Host }, SystemTime::now()),
            Err(TransitionError::NothingToReveal(Side::Host))
        );
        apply(&mut sm, SessionEvent::PassTurn { side: Side::Host });
        assert_eq!(sm.session.reveal_turn, Side::Guest);

        assert_eq!(
            sm.apply(SessionEvent::PassTurn { side: Side::Guest }, SystemTime::now()),
            Err(TransitionError::MustReveal(Side::Guest))
        );
    }

    #[test]
    fn guest_leaving_resets_guest_side_only() {
        let mut sm = state();
        apply(&mut sm, SessionEvent::Join { guest_id: "guest-device".into() });
        apply(&mut sm, SessionEvent::SetReady { side: Side::Host, ready: true });
        apply(&mut sm, SessionEvent::SetReady { side: Side::Guest, ready: false });

        assert_eq!(apply(&mut sm, SessionEvent::GuestLeft), Phase::Waiting);
        assert!(sm.session.guest_participant.is_none());
        assert!(!sm.session.guest_ready);
        assert!(sm.session.host_ready);
    }

    #[test]
    fn observed_phase_tolerates_lagging_session_record() {
        let sm = revealing(1, 1);
        let flags = sm.ledger.snapshot();

        let mut stale = sm.session.clone();
        stale.phase = Phase::Selecting;
        stale.guest_submitted = false;
        stale.version = 3;
        assert_eq!(observed_phase(&stale, &flags, 4), Phase::Revealing);

        let revealed: Vec<Flag> = flags
            .into_iter()
            .map(|mut flag| {
                flag.is_revealed = true;
                flag
            })
            .collect();
        assert_eq!(observed_phase(&stale, &revealed, 4), Phase::Finished);
    }

    #[test]
    fn older_flags_do_not_advance_a_newer_record() {
        let sm = revealing(1, 1);
        let leftover = sm.ledger.snapshot();

        // A new guest joined and readied after the flags above were read.
        let mut rejoined = sm.session.clone();
        rejoined.phase = Phase::Selecting;
        rejoined.host_submitted = false;
        rejoined.guest_submitted = false;
        rejoined.version = 9;
        assert_eq!(observed_phase(&rejoined, &leftover, 5), Phase::Selecting);
        assert_eq!(observed_phase(&rejoined, &leftover, 9), Phase::Revealing);
    }
}
