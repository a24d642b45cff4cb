//! Player-side coordinator: local flag selection, the selection countdown and
//! the calls a participant makes against the lifecycle service.

use std::sync::Arc;

use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    services::{
        mirror::{MirrorView, SessionMirror},
        session_service,
        timer::{Countdown, TimerEvent},
    },
    state::{
        SharedState,
        flag_ledger::MAX_FLAGS,
        session::{Flag, ImageRef, Session, Side},
    },
};

/// Reasons a staging operation is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// The selection already holds its maximum.
    #[error("at most {max} flags can be staged")]
    Full {
        /// Configured upper bound.
        max: usize,
    },
    /// An image with the same identifier is already staged.
    #[error("`{0}` is already staged")]
    Duplicate(String),
    /// A position does not point at a staged flag.
    #[error("position {index} is out of range for {len} staged flags")]
    OutOfRange {
        /// Offending position.
        index: usize,
        /// Number of staged flags.
        len: usize,
    },
}

/// Image picked locally, not yet submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFlag {
    /// Identifier used to detect duplicates (provider id, asset id, file path).
    pub id: String,
    /// Image that will be submitted.
    pub image: ImageRef,
}

/// Ordered local selection; its order becomes the reveal order.
#[derive(Debug, Clone)]
pub struct Selection {
    max: usize,
    staged: Vec<StagedFlag>,
}

impl Default for Selection {
    fn default() -> Self {
        Self::new(MAX_FLAGS)
    }
}

impl Selection {
    /// Empty selection holding at most `max` flags, clamped to `1..=MAX_FLAGS`.
    pub fn new(max: usize) -> Self {
        Self {
            max: max.clamp(1, MAX_FLAGS),
            staged: Vec::new(),
        }
    }

    /// Append an image, refusing duplicates and anything beyond the limit.
    pub fn stage(&mut self, id: impl Into<String>, image: ImageRef) -> Result<(), SelectionError> {
        let id = id.into();
        if self.staged.iter().any(|staged| staged.id == id) {
            return Err(SelectionError::Duplicate(id));
        }
        if self.is_full() {
            return Err(SelectionError::Full { max: self.max });
        }
        self.staged.push(StagedFlag { id, image });
        Ok(())
    }

    /// Remove `id` from the selection, returning whether it was staged.
    pub fn unstage(&mut self, id: &str) -> bool {
        let before = self.staged.len();
        self.staged.retain(|staged| staged.id != id);
        self.staged.len() != before
    }

    /// Move the flag at `from` to position `to`, shifting the others.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<(), SelectionError> {
        let len = self.staged.len();
        for index in [from, to] {
            if index >= len {
                return Err(SelectionError::OutOfRange { index, len });
            }
        }
        let flag = self.staged.remove(from);
        self.staged.insert(to, flag);
        Ok(())
    }

    /// Staged flags in submission order.
    pub fn staged(&self) -> &[StagedFlag] {
        &self.staged
    }

    /// Images in submission order, ready to be submitted.
    pub fn images(&self) -> Vec<ImageRef> {
        self.staged.iter().map(|staged| staged.image.clone()).collect()
    }

    /// Number of staged flags.
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Whether staging another flag would exceed the limit.
    pub fn is_full(&self) -> bool {
        self.staged.len() >= self.max
    }
}

/// What a reveal attempt ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealOutcome {
    /// The next local flag was revealed.
    Revealed(Flag),
    /// Nothing was left locally, so the turn went to the opponent.
    Passed,
}

/// One participant's handle on a session.
pub struct PlayerSession {
    state: SharedState,
    session_id: Uuid,
    side: Side,
    mirror: SessionMirror,
    selection: Arc<Mutex<Selection>>,
    countdown: Countdown,
    remaining: watch::Receiver<u64>,
    listener: JoinHandle<()>,
}

impl PlayerSession {
    /// Create a session as host.
    pub async fn create(
        state: &SharedState,
        theme: String,
        participant_id: String,
    ) -> Result<Self, ServiceError> {
        let session = session_service::create_session(state, theme, participant_id).await?;
        Self::attach(state, session.id, Side::Host).await
    }

    /// Join a session as guest.
    pub async fn join(
        state: &SharedState,
        code: &str,
        participant_id: String,
    ) -> Result<Self, ServiceError> {
        let session = session_service::join_session(state, code, participant_id).await?;
        Self::attach(state, session.id, Side::Guest).await
    }

    async fn attach(state: &SharedState, session_id: Uuid, side: Side) -> Result<Self, ServiceError> {
        let mirror = SessionMirror::attach(state, session_id, side).await?;
        let config = state.config();
        let selection = Arc::new(Mutex::new(Selection::new(config.max_flags)));
        let (countdown, events) = Countdown::new(config.selection_duration);
        let (remaining_tx, remaining) = watch::channel(config.selection_duration.as_secs());

        let listener = tokio::spawn(run_countdown_listener(
            state.clone(),
            session_id,
            side,
            selection.clone(),
            events,
            remaining_tx,
        ));

        Ok(Self {
            state: state.clone(),
            session_id,
            side,
            mirror,
            selection,
            countdown,
            remaining,
            listener,
        })
    }

    /// Identifier of the followed session.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Side this participant plays.
    pub fn side(&self) -> Side {
        self.side
    }

    /// Latest derived view of the session.
    pub fn view(&self) -> MirrorView {
        self.mirror.current()
    }

    /// Mirror feeding [`PlayerSession::view`].
    pub fn mirror(&self) -> &SessionMirror {
        &self.mirror
    }

    /// Flip the ready mark of this side.
    ///
    /// The committed record decides the direction; the mirror may still lag
    /// behind a toggle issued just before.
    pub async fn toggle_ready(&self) -> Result<Session, ServiceError> {
        let current = session_service::get_session(&self.state, self.session_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("session `{}` not found", self.session_id))
            })?;
        if current.is_ready(self.side) {
            session_service::set_unready(&self.state, self.session_id, self.side).await
        } else {
            session_service::set_ready(&self.state, self.session_id, self.side).await
        }
    }

    /// Stage an image for submission.
    pub async fn stage(&self, id: impl Into<String>, image: ImageRef) -> Result<(), SelectionError> {
        self.selection.lock().await.stage(id, image)
    }

    /// Drop a staged image, returning whether it was staged.
    pub async fn unstage(&self, id: &str) -> bool {
        self.selection.lock().await.unstage(id)
    }

    /// Move a staged image to another position.
    pub async fn reorder(&self, from: usize, to: usize) -> Result<(), SelectionError> {
        self.selection.lock().await.reorder(from, to)
    }

    /// Copy of the current local selection.
    pub async fn selection(&self) -> Selection {
        self.selection.lock().await.clone()
    }

    /// Start the selection countdown; at zero whatever is staged gets submitted.
    pub fn start_countdown(&mut self) {
        self.countdown.start();
    }

    /// Stop the selection countdown without submitting.
    pub fn stop_countdown(&mut self) {
        self.countdown.stop();
    }

    /// Seconds left on the selection countdown.
    pub fn remaining_seconds(&self) -> watch::Receiver<u64> {
        self.remaining.clone()
    }

    /// Submit the staged flags in their current order.
    pub async fn submit(&mut self) -> Result<Session, ServiceError> {
        let images = self.selection.lock().await.images();
        let session =
            session_service::submit_flags(&self.state, self.session_id, self.side, images).await?;
        self.countdown.stop();
        Ok(session)
    }

    /// Reveal the next local flag, passing the turn when nothing is left locally.
    pub async fn reveal(&self) -> Result<RevealOutcome, ServiceError> {
        match session_service::reveal_next(&self.state, self.session_id, self.side).await {
            Ok(flag) => Ok(RevealOutcome::Revealed(flag)),
            Err(ServiceError::NothingToReveal(side)) => {
                debug!(session_id = %self.session_id, %side, "nothing left to reveal; passing turn");
                session_service::pass_turn(&self.state, self.session_id, self.side).await?;
                Ok(RevealOutcome::Passed)
            }
            Err(err) => Err(err),
        }
    }

    /// Leave the session and stop following it.
    pub async fn leave(self) -> Result<(), ServiceError> {
        session_service::leave_session(&self.state, self.session_id, self.side).await
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn run_countdown_listener(
    state: SharedState,
    session_id: Uuid,
    side: Side,
    selection: Arc<Mutex<Selection>>,
    mut events: mpsc::Receiver<TimerEvent>,
    remaining: watch::Sender<u64>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TimerEvent::Tick { remaining_secs } => {
                let _ = remaining.send(remaining_secs);
            }
            TimerEvent::Expired => {
                let images = selection.lock().await.images();
                if images.is_empty() {
                    warn!(%session_id, %side, "selection time is up with nothing staged");
                    continue;
                }
                match session_service::submit_flags(&state, session_id, side, images).await {
                    Ok(_) => info!(%session_id, %side, "selection time is up; staged flags submitted"),
                    Err(ServiceError::AlreadySubmitted(_)) => {}
                    Err(err) => {
                        warn!(%session_id, %side, error = %err, "forced submission failed")
                    }
                }
            }
        }
    }
}
