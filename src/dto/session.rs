use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{format_system_time, validation::validate_room_code},
    state::{
        session::{Flag, FlagSource, ImageRef, Phase, Session, Side},
        state_machine::SessionState,
    },
};

/// Payload used to open a new session.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    /// Prompt both players pick images for.
    #[validate(length(min = 1, max = 120))]
    pub theme: String,
    /// Opaque device/participant identifier of the host.
    #[validate(length(min = 1, max = 64))]
    pub host_id: String,
}

/// Payload used to join an existing session with its room code.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinSessionRequest {
    /// Six-character room code, case-insensitive.
    #[validate(custom(function = "validate_room_code"))]
    pub code: String,
    /// Opaque device/participant identifier of the guest.
    #[validate(length(min = 1, max = 64))]
    pub guest_id: String,
}

/// Set or clear the ready mark of one side.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ReadyRequest {
    pub side: Side,
    pub ready: bool,
}

/// Request carrying only the acting side (reveal, pass, leave).
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SideRequest {
    pub side: Side,
}

/// One image of a submission.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ImageInput {
    #[validate(length(min = 1, max = 2048))]
    pub image_ref: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 2048))]
    pub thumbnail_ref: Option<String>,
    pub source: FlagSource,
}

impl From<ImageInput> for ImageRef {
    fn from(value: ImageInput) -> Self {
        Self {
            image_ref: value.image_ref,
            thumbnail_ref: value.thumbnail_ref,
            source: value.source,
        }
    }
}

/// All flags of one side, in reveal order. The count is checked by the service
/// so that out-of-range submissions surface as `invalid_count`.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitFlagsRequest {
    pub side: Side,
    #[validate(nested)]
    pub images: Vec<ImageInput>,
}

/// Session record as exposed to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionView {
    pub id: Uuid,
    pub code: String,
    pub theme: String,
    pub host_participant: String,
    pub guest_participant: Option<String>,
    /// Stored phase, or the derived `finished` when built from a full snapshot.
    pub phase: Phase,
    pub host_ready: bool,
    pub guest_ready: bool,
    pub host_submitted: bool,
    pub guest_submitted: bool,
    pub reveal_turn: Side,
    /// RFC3339 creation time.
    pub created_at: String,
    /// RFC3339 expiry time.
    pub expires_at: String,
    /// RFC3339 time of the last committed change.
    pub updated_at: String,
    /// Revision of the record; higher always means newer.
    pub version: u64,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
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
            created_at: format_system_time(session.created_at),
            expires_at: format_system_time(session.expires_at),
            updated_at: format_system_time(session.updated_at),
            version: session.version,
        }
    }
}

impl From<SessionState> for SessionView {
    fn from(state: SessionState) -> Self {
        let phase = state.observed_phase();
        let mut view = SessionView::from(state.session);
        view.phase = phase;
        view
    }
}

/// Flag as exposed to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FlagView {
    pub id: Uuid,
    pub session_id: Uuid,
    pub owner: Side,
    pub owner_is_host: bool,
    pub image_ref: String,
    pub thumbnail_ref: Option<String>,
    pub source: FlagSource,
    pub reveal_order: u8,
    pub is_revealed: bool,
    /// RFC3339 submission time.
    pub created_at: String,
}

impl From<Flag> for FlagView {
    fn from(flag: Flag) -> Self {
        Self {
            owner: flag.owner(),
            id: flag.id,
            session_id: flag.session_id,
            owner_is_host: flag.owner_is_host,
            image_ref: flag.image_ref,
            thumbnail_ref: flag.thumbnail_ref,
            source: flag.source,
            reveal_order: flag.reveal_order,
            is_revealed: flag.is_revealed,
            created_at: format_system_time(flag.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn join_request_validates_code_shape() {
        let valid = JoinSessionRequest {
            code: "abcdef".into(),
            guest_id: "guest".into(),
        };
        assert!(valid.validate().is_ok());

        let invalid = JoinSessionRequest {
            code: "ABCDE1".into(),
            guest_id: String::new(),
        };
        let errors = invalid.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("code"));
        assert!(fields.contains_key("guest_id"));
    }

    #[test]
    fn nested_images_are_validated() {
        let request = SubmitFlagsRequest {
            side: Side::Host,
            images: vec![ImageInput {
                image_ref: String::new(),
                thumbnail_ref: None,
                source: FlagSource::Camera,
            }],
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn session_view_serializes_snake_case_enums() {
        let session = Session::new(
            "ABCDEF".into(),
            "Theme".into(),
            "host".into(),
            Duration::from_secs(60),
        );
        let json = serde_json::to_value(SessionView::from(session)).unwrap();
        assert_eq!(json["phase"], "waiting");
        assert_eq!(json["reveal_turn"], "host");
        assert!(json["guest_participant"].is_null());
    }
}
