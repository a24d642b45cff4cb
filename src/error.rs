use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{
        session::Side,
        state_machine::{InvalidTransition, TransitionError},
    },
};

/// Errors that can occur in service layer operations.
///
/// Every failure is scoped to one operation on one session; none is fatal.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Unknown room code or session.
    #[error("not found: {0}")]
    NotFound(String),
    /// Session already has a guest.
    #[error("session already has a guest")]
    Full,
    /// Host attempted to join their own session.
    #[error("you cannot join your own session")]
    SelfJoin,
    /// Duplicate submission by the same side.
    #[error("{0} already submitted flags")]
    AlreadySubmitted(Side),
    /// Submission outside the allowed number of images.
    #[error("expected between 1 and {max} images, got {count}")]
    InvalidCount {
        /// Number of images received.
        count: usize,
        /// Configured upper bound.
        max: usize,
    },
    /// Reveal attempted out of turn.
    #[error("it is not {0}'s turn to reveal")]
    NotYourTurn(Side),
    /// The side holding the turn has no unrevealed flag left.
    #[error("{0} has nothing left to reveal")]
    NothingToReveal(Side),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Concurrent writers kept winning until the retry budget ran out.
    #[error("too much contention on {0}; retry later")]
    Contention(&'static str),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
    /// The image search provider failed.
    #[error("image provider failed: {0}")]
    Upstream(String),
}

impl ServiceError {
    /// Stable snake_case name of the error kind, exposed to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Full => "full",
            ServiceError::SelfJoin => "self_join",
            ServiceError::AlreadySubmitted(_) => "already_submitted",
            ServiceError::InvalidCount { .. } => "invalid_count",
            ServiceError::NotYourTurn(_) => "not_your_turn",
            ServiceError::NothingToReveal(_) => "nothing_to_reveal",
            ServiceError::InvalidState(_) => "invalid_state",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::Unavailable(_) | ServiceError::Degraded => "unavailable",
            ServiceError::Contention(_) | ServiceError::Timeout => "unavailable",
            ServiceError::Upstream(_) => "upstream",
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<TransitionError> for ServiceError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Full => ServiceError::Full,
            TransitionError::SelfJoin => ServiceError::SelfJoin,
            TransitionError::AlreadySubmitted(side) => ServiceError::AlreadySubmitted(side),
            TransitionError::InvalidCount { count } => ServiceError::InvalidCount {
                count,
                max: crate::state::flag_ledger::MAX_FLAGS,
            },
            TransitionError::NotYourTurn(side) => ServiceError::NotYourTurn(side),
            TransitionError::NothingToReveal(side) => ServiceError::NothingToReveal(side),
            TransitionError::GuestAbsent => {
                ServiceError::InvalidState("no guest has joined this session".into())
            }
            TransitionError::MustReveal(side) => {
                ServiceError::InvalidState(format!("{side} still has flags to reveal"))
            }
            TransitionError::AllRevealed => {
                ServiceError::InvalidState("every flag is already revealed".into())
            }
            TransitionError::InvalidTransition(InvalidTransition { from, event }) => {
                ServiceError::InvalidState(format!("{event} is not allowed while {from:?}"))
            }
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest {
            kind: "invalid_input",
            message: format!("validation failed: {}", err),
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {message}")]
    BadRequest {
        /// Error kind exposed to clients.
        kind: &'static str,
        /// Human-readable detail.
        message: String,
    },
    /// Requested resource not found.
    #[error("not found: {message}")]
    NotFound {
        /// Error kind exposed to clients.
        kind: &'static str,
        /// Human-readable detail.
        message: String,
    },
    /// Conflict with current state.
    #[error("conflict: {message}")]
    Conflict {
        /// Error kind exposed to clients.
        kind: &'static str,
        /// Human-readable detail.
        message: String,
    },
    /// Service unavailable or degraded; callers are expected to retry.
    #[error("service unavailable: {message}")]
    ServiceUnavailable {
        /// Error kind exposed to clients.
        kind: &'static str,
        /// Human-readable detail.
        message: String,
    },
    /// An upstream dependency failed.
    #[error("bad gateway: {message}")]
    BadGateway {
        /// Error kind exposed to clients.
        kind: &'static str,
        /// Human-readable detail.
        message: String,
    },
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        match err {
            ServiceError::NotFound(_) => AppError::NotFound { kind, message },
            ServiceError::InvalidCount { .. } | ServiceError::InvalidInput(_) => {
                AppError::BadRequest { kind, message }
            }
            ServiceError::Full
            | ServiceError::SelfJoin
            | ServiceError::AlreadySubmitted(_)
            | ServiceError::NotYourTurn(_)
            | ServiceError::NothingToReveal(_)
            | ServiceError::InvalidState(_) => AppError::Conflict { kind, message },
            ServiceError::Unavailable(_)
            | ServiceError::Degraded
            | ServiceError::Contention(_)
            | ServiceError::Timeout => AppError::ServiceUnavailable { kind, message },
            ServiceError::Upstream(_) => AppError::BadGateway { kind, message },
        }
    }
}

/// JSON body returned with every error response.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    /// Error kind (`not_found`, `full`, `self_join`, `not_your_turn`, ...).
    pub kind: String,
    /// Human-readable description.
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, kind) = match &self {
            AppError::BadRequest { kind, .. } => (StatusCode::BAD_REQUEST, *kind),
            AppError::NotFound { kind, .. } => (StatusCode::NOT_FOUND, *kind),
            AppError::Conflict { kind, .. } => (StatusCode::CONFLICT, *kind),
            AppError::ServiceUnavailable { kind, .. } => (StatusCode::SERVICE_UNAVAILABLE, *kind),
            AppError::BadGateway { kind, .. } => (StatusCode::BAD_GATEWAY, *kind),
        };

        let payload = Json(ErrorBody {
            kind: kind.to_string(),
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
