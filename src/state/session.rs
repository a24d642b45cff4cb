use std::{
    fmt,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Which of the two participants an operation pertains to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Participant who created the session.
    Host,
    /// Participant who joined with the room code.
    Guest,
}

impl Side {
    /// The other participant.
    pub fn opponent(self) -> Side {
        match self {
            Side::Host => Side::Guest,
            Side::Guest => Side::Host,
        }
    }

    /// Whether this side is the host.
    pub fn is_host(self) -> bool {
        matches!(self, Side::Host)
    }

    /// Map the stored `owner_is_host` flag back to a side.
    pub fn from_is_host(is_host: bool) -> Side {
        if is_host { Side::Host } else { Side::Guest }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Host => f.write_str("host"),
            Side::Guest => f.write_str("guest"),
        }
    }
}

/// Coarse-grained stage of a session.
///
/// `Finished` is only ever derived from the flag ledger, it is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Host is alone in the room.
    Waiting,
    /// Both participants are present, readiness is being collected.
    Ready,
    /// Both participants are picking their flags.
    Selecting,
    /// Flags are revealed one at a time, alternating sides.
    Revealing,
    /// Every flag of both sides has been revealed.
    Finished,
}

/// Provenance of a flag image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlagSource {
    /// Picked from the image search provider.
    Search,
    /// Taken with the device camera.
    Camera,
    /// Picked from the device photo library.
    Library,
}

/// Opaque reference to image content submitted as a flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Full-size image reference.
    pub image_ref: String,
    /// Optional thumbnail reference.
    pub thumbnail_ref: Option<String>,
    /// Where the image came from.
    pub source: FlagSource,
}

/// One image submitted by a participant with a fixed reveal position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    /// Unique identifier of the flag.
    pub id: Uuid,
    /// Session the flag belongs to.
    pub session_id: Uuid,
    /// Whether the host owns this flag.
    pub owner_is_host: bool,
    /// Full-size image reference.
    pub image_ref: String,
    /// Optional thumbnail reference.
    pub thumbnail_ref: Option<String>,
    /// Where the image came from.
    pub source: FlagSource,
    /// Position in the owner's reveal sequence, dense from 1.
    pub reveal_order: u8,
    /// Flips to true exactly once.
    pub is_revealed: bool,
    /// Submission time.
    pub created_at: SystemTime,
}

impl Flag {
    /// Side owning this flag.
    pub fn owner(&self) -> Side {
        Side::from_is_host(self.owner_is_host)
    }
}

/// Shared mutable record of a two-party session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque unique identifier, immutable.
    pub id: Uuid,
    /// Human-typable room code, immutable.
    pub code: String,
    /// Theme picked by the host, immutable.
    pub theme: String,
    /// Participant who created the session.
    pub host_participant: String,
    /// Participant who joined, if any.
    pub guest_participant: Option<String>,
    /// Stored phase (never `Finished`).
    pub phase: Phase,
    /// Host readiness.
    pub host_ready: bool,
    /// Guest readiness.
    pub guest_ready: bool,
    /// Whether the host has submitted flags.
    pub host_submitted: bool,
    /// Whether the guest has submitted flags.
    pub guest_submitted: bool,
    /// Side entitled to reveal next; meaningful while revealing.
    pub reveal_turn: Side,
    /// Creation time.
    pub created_at: SystemTime,
    /// After this instant the session is unreachable.
    pub expires_at: SystemTime,
    /// Last committed mutation.
    pub updated_at: SystemTime,
    /// Store revision, bumped on every committed mutation.
    pub version: u64,
}

impl Session {
    /// Open a fresh session in the waiting phase.
    pub fn new(code: String, theme: String, host_participant: String, ttl: Duration) -> Self {
        let now = SystemTime::now();
        Self {
            id: Uuid::new_v4(),
            code,
            theme,
            host_participant,
            guest_participant: None,
            phase: Phase::Waiting,
            host_ready: false,
            guest_ready: false,
            host_submitted: false,
            guest_submitted: false,
            reveal_turn: Side::Host,
            created_at: now,
            expires_at: now + ttl,
            updated_at: now,
            version: 0,
        }
    }

    /// Participant seated on `side`, if any.
    pub fn participant(&self, side: Side) -> Option<&str> {
        match side {
            Side::Host => Some(self.host_participant.as_str()),
            Side::Guest => self.guest_participant.as_deref(),
        }
    }

    /// Readiness of `side`.
    pub fn is_ready(&self, side: Side) -> bool {
        match side {
            Side::Host => self.host_ready,
            Side::Guest => self.guest_ready,
        }
    }

    pub(crate) fn set_ready(&mut self, side: Side, ready: bool) {
        match side {
            Side::Host => self.host_ready = ready,
            Side::Guest => self.guest_ready = ready,
        }
    }

    /// Whether `side` has submitted its flags.
    pub fn has_submitted(&self, side: Side) -> bool {
        match side {
            Side::Host => self.host_submitted,
            Side::Guest => self.guest_submitted,
        }
    }

    pub(crate) fn mark_submitted(&mut self, side: Side) {
        match side {
            Side::Host => self.host_submitted = true,
            Side::Guest => self.guest_submitted = true,
        }
    }

    /// Both participants flagged themselves ready.
    pub fn both_ready(&self) -> bool {
        self.host_ready && self.guest_ready
    }

    /// Both participants submitted their flags.
    pub fn both_submitted(&self) -> bool {
        self.host_submitted && self.guest_submitted
    }

    /// Expiry is advisory: checked when a session is loaded, never mid-write.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    pub(crate) fn clear_guest(&mut self) {
        self.guest_participant = None;
        self.guest_ready = false;
        self.guest_submitted = false;
        self.reveal_turn = Side::Host;
        self.phase = Phase::Waiting;
    }
}
