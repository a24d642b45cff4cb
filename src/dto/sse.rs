use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent when the flag ledger changed; clients re-fetch `GET /sessions/{id}/flags`.
pub struct FlagsChangedEvent {
    pub session_id: Uuid,
    pub version: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent once when the host left and the session was deleted.
pub struct SessionClosedEvent {
    pub session_id: Uuid,
}
