use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::session::{
        CreateSessionRequest, FlagView, JoinSessionRequest, ReadyRequest, SessionView,
        SideRequest, SubmitFlagsRequest,
    },
    error::{AppError, ErrorBody, ServiceError},
    services::session_service,
    state::SharedState,
};

/// Routes covering the whole session lifecycle.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/join", post(join_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/ready", post(set_ready))
        .route("/sessions/{id}/flags", post(submit_flags).get(get_flags))
        .route("/sessions/{id}/reveal", post(reveal_next))
        .route("/sessions/{id}/pass", post(pass_turn))
        .route("/sessions/{id}/leave", post(leave_session))
}

/// Open a new session and return it with its room code.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = SessionView),
        (status = 503, description = "Storage unavailable", body = ErrorBody)
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let session = session_service::create_session(&state, payload.theme, payload.host_id).await?;
    Ok(Json(session.into()))
}

/// Join a session with its room code.
#[utoipa::path(
    post,
    path = "/sessions/join",
    tag = "sessions",
    request_body = JoinSessionRequest,
    responses(
        (status = 200, description = "Joined", body = SessionView),
        (status = 404, description = "Unknown or expired room code", body = ErrorBody),
        (status = 409, description = "Session full or self-join", body = ErrorBody)
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<JoinSessionRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let session = session_service::join_session(&state, &payload.code, payload.guest_id).await?;
    Ok(Json(session.into()))
}

/// Fetch a session; the phase is derived from the flags (`finished` included).
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Current session", body = SessionView),
        (status = 404, description = "Unknown or expired session", body = ErrorBody)
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let current = session_service::load_state(&state, id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{id}` not found")))?;
    Ok(Json(current.into()))
}

/// Set or clear the ready mark of one side.
#[utoipa::path(
    post,
    path = "/sessions/{id}/ready",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = ReadyRequest,
    responses(
        (status = 200, description = "Readiness updated", body = SessionView),
        (status = 404, description = "Unknown session", body = ErrorBody)
    )
)]
pub async fn set_ready(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<ReadyRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let session = if payload.ready {
        session_service::set_ready(&state, id, payload.side).await?
    } else {
        session_service::set_unready(&state, id, payload.side).await?
    };
    Ok(Json(session.into()))
}

/// Submit all flags of one side at once.
#[utoipa::path(
    post,
    path = "/sessions/{id}/flags",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = SubmitFlagsRequest,
    responses(
        (status = 200, description = "Flags submitted", body = SessionView),
        (status = 400, description = "Not between 1 and 5 images", body = ErrorBody),
        (status = 409, description = "Already submitted or not selecting", body = ErrorBody)
    )
)]
pub async fn submit_flags(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SubmitFlagsRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let images = payload.images.into_iter().map(Into::into).collect();
    let session = session_service::submit_flags(&state, id, payload.side, images).await?;
    Ok(Json(session.into()))
}

/// List every flag of the session in reveal order.
#[utoipa::path(
    get,
    path = "/sessions/{id}/flags",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Ordered flags", body = [FlagView]),
        (status = 404, description = "Unknown session", body = ErrorBody)
    )
)]
pub async fn get_flags(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<FlagView>>, AppError> {
    let flags = session_service::get_flags(&state, id).await?;
    Ok(Json(flags.into_iter().map(Into::into).collect()))
}

/// Reveal the next flag of the side holding the turn.
#[utoipa::path(
    post,
    path = "/sessions/{id}/reveal",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = SideRequest,
    responses(
        (status = 200, description = "Revealed flag", body = FlagView),
        (status = 409, description = "Not your turn or nothing left to reveal", body = ErrorBody)
    )
)]
pub async fn reveal_next(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SideRequest>>,
) -> Result<Json<FlagView>, AppError> {
    let flag = session_service::reveal_next(&state, id, payload.side).await?;
    Ok(Json(flag.into()))
}

/// Hand the reveal turn over when the caller has nothing left to reveal.
#[utoipa::path(
    post,
    path = "/sessions/{id}/pass",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = SideRequest,
    responses(
        (status = 200, description = "Turn passed", body = SessionView),
        (status = 409, description = "Not your turn or flags still to reveal", body = ErrorBody)
    )
)]
pub async fn pass_turn(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SideRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let session = session_service::pass_turn(&state, id, payload.side).await?;
    Ok(Json(session.into()))
}

/// Leave the session; the host leaving deletes it.
#[utoipa::path(
    post,
    path = "/sessions/{id}/leave",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = SideRequest,
    responses((status = 204, description = "Left the session"))
)]
pub async fn leave_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SideRequest>>,
) -> Result<StatusCode, AppError> {
    session_service::leave_session(&state, id, payload.side).await?;
    Ok(StatusCode::NO_CONTENT)
}
