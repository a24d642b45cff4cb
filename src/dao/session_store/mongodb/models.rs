use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::{
    dao::models::{FlagEntity, SessionEntity},
    state::session::{FlagSource, Phase, Side},
};

/// Session document; flags are embedded so a single replace covers both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    code: String,
    theme: String,
    host_participant: String,
    guest_participant: Option<String>,
    phase: Phase,
    host_ready: bool,
    guest_ready: bool,
    host_submitted: bool,
    guest_submitted: bool,
    reveal_turn: Side,
    created_at: DateTime,
    expires_at: DateTime,
    updated_at: DateTime,
    version: i64,
    #[serde(default)]
    flags: Vec<MongoFlagDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoFlagDocument {
    id: String,
    owner_is_host: bool,
    image_ref: String,
    thumbnail_ref: Option<String>,
    source: FlagSource,
    reveal_order: i32,
    is_revealed: bool,
    created_at: DateTime,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
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
            created_at: DateTime::from_system_time(value.created_at),
            expires_at: DateTime::from_system_time(value.expires_at),
            updated_at: DateTime::from_system_time(value.updated_at),
            version: value.version as i64,
            flags: value.flags.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<FlagEntity> for MongoFlagDocument {
    fn from(value: FlagEntity) -> Self {
        Self {
            id: value.id.to_string(),
            owner_is_host: value.owner_is_host,
            image_ref: value.image_ref,
            thumbnail_ref: value.thumbnail_ref,
            source: value.source,
            reveal_order: i32::from(value.reveal_order),
            is_revealed: value.is_revealed,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> Result<Self, Self::Error> {
        let malformed = |reason: String| MongoDaoError::MalformedSession {
            id: value.id.clone(),
            reason,
        };

        let id = Uuid::parse_str(&value.id).map_err(|err| malformed(err.to_string()))?;
        let version = u64::try_from(value.version)
            .map_err(|_| malformed(format!("negative version {}", value.version)))?;
        let flags = value
            .flags
            .iter()
            .cloned()
            .map(|flag| flag.try_into().map_err(&malformed))
            .collect::<Result<Vec<FlagEntity>, _>>()?;

        Ok(Self {
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
            created_at: value.created_at.to_system_time(),
            expires_at: value.expires_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
            version,
            flags,
        })
    }
}

impl TryFrom<MongoFlagDocument> for FlagEntity {
    type Error = String;

    fn try_from(value: MongoFlagDocument) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&value.id).map_err(|err| format!("flag `{}`: {err}", value.id))?;
        let reveal_order = u8::try_from(value.reveal_order)
            .map_err(|_| format!("flag `{id}` has reveal order {}", value.reveal_order))?;

        Ok(Self {
            id,
            owner_is_host: value.owner_is_host,
            image_ref: value.image_ref,
            thumbnail_ref: value.thumbnail_ref,
            source: value.source,
            reveal_order,
            is_revealed: value.is_revealed,
            created_at: value.created_at.to_system_time(),
        })
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}
