use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use uuid::Uuid;

use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sessions/{id}/events",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session change stream (`session.updated`, `flags.changed`, `session.closed`)", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown or expired session")
    )
)]
/// Stream changes of one session, starting with its current snapshot.
pub async fn session_events(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    Ok(sse_service::subscribe_session(&state, id).await?)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sessions/{id}/events", get(session_events))
}
