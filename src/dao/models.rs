use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::state::{
    flag_ledger::FlagLedger,
    session::{Flag, FlagSource, Phase, Session, Side},
    state_machine::SessionState,
};

/// Persisted form of a session: the shared record plus both flag ledgers.
///
/// The whole document is the unit of a conditional write, so a session and its
/// flags always change together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Primary key of the session.
    pub id: Uuid,
    /// Room code, unique among active sessions.
    pub code: String,
    /// Theme chosen by the host.
    pub theme: String,
    /// Participant who created the session.
    pub host_participant: String,
    /// Participant who joined, if any.
    pub guest_participant: Option<String>,
    /// Stored phase.
    pub phase: Phase,
    /// Host readiness.
    pub host_ready: bool,
    /// Guest readiness.
    pub guest_ready: bool,
    /// Host submitted flags.
    pub host_submitted: bool,
    /// Guest submitted flags.
    pub guest_submitted: bool,
    /// Side entitled to reveal next.
    pub reveal_turn: Side,
    /// Creation time.
    pub created_at: SystemTime,
    /// Expiry time.
    pub expires_at: SystemTime,
    /// Last update time.
    pub updated_at: SystemTime,
    /// Revision used for compare-and-swap writes.
    pub version: u64,
    /// Flags of both sides.
    pub flags: Vec<FlagEntity>,
}

/// Persisted form of a single flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlagEntity {
    /// Primary key of the flag.
    pub id: Uuid,
    /// Whether the host owns this flag.
    pub owner_is_host: bool,
    /// Full-size image reference.
    pub image_ref: String,
    /// Optional thumbnail reference.
    pub thumbnail_ref: Option<String>,
    /// Image provenance.
    pub source: FlagSource,
    /// Position in the owner's reveal sequence.
    pub reveal_order: u8,
    /// Whether the flag has been revealed.
    pub is_revealed: bool,
    /// Submission time.
    pub created_at: SystemTime,
}

impl From<Flag> for FlagEntity {
    fn from(value: Flag) -> Self {
        Self {
            id: value.id,
            owner_is_host: value.owner_is_host,
            image_ref: value.image_ref,
            thumbnail_ref: value.thumbnail_ref,
            source: value.source,
            reveal_order: value.reveal_order,
            is_revealed: value.is_revealed,
            created_at: value.created_at,
        }
    }
}

impl FlagEntity {
    fn into_flag(self, session_id: Uuid) -> Flag {
        Flag {
            id: self.id,
            session_id,
            owner_is_host: self.owner_is_host,
            image_ref: self.image_ref,
            thumbnail_ref: self.thumbnail_ref,
            source: self.source,
            reveal_order: self.reveal_order,
            is_revealed: self.is_revealed,
            created_at: self.created_at,
        }
    }
}

impl From<SessionState> for SessionEntity {
    fn from(value: SessionState) -> Self {
        let SessionState { session, ledger } = value;
        Self {
            id: session.id,
            code: session.code,
            theme: session.theme,
            host_participant: session.host_participant,
            guest_participant: session.guest_participant,
            phase: session.phase,
            host_ready: session.host_ready,
            guest_ready: session.guest_ready,
            host_submitted: session.host_submitted,
            guest_submitted: session.guest_submitted,
            reveal_turn: session.reveal_turn,
            created_at: session.created_at,
            expires_at: session.expires_at,
            updated_at: session.updated_at,
            version: session.version,
            flags: ledger.into_flags().into_iter().map(Into::into).collect(),
        }
    }
}

impl From<SessionEntity> for SessionState {
    fn from(value: SessionEntity) -> Self {
        let id = value.id;
        let flags = value
            .flags
            .into_iter()
            .map(|flag| flag.into_flag(id))
            .collect();
        let session = Session {
            id,
            code: value.code,
            theme: value.theme,
            host_participant: value.host_participant,
            guest_participant: value.guest_participant,
            phase: value.phase,
            host_ready: value.host_ready,
            guest_ready: value.guest_ready,
            host_submitted: value.host_submitted,
            guest_submitted: value.guest_submitted,
            reveal_turn: value.reveal_turn,
            created_at: value.created_at,
            expires_at: value.expires_at,
            updated_at: value.updated_at,
            version: value.version,
        };

        Self {
            session,
            ledger: FlagLedger::from_flags(id, flags),
        }
    }
}
