use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for HearMeOut Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sessions::create_session,
        crate::routes::sessions::join_session,
        crate::routes::sessions::get_session,
        crate::routes::sessions::set_ready,
        crate::routes::sessions::submit_flags,
        crate::routes::sessions::get_flags,
        crate::routes::sessions::reveal_next,
        crate::routes::sessions::pass_turn,
        crate::routes::sessions::leave_session,
        crate::routes::sse::session_events,
        crate::routes::images::search_images,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::JoinSessionRequest,
            crate::dto::session::ReadyRequest,
            crate::dto::session::SideRequest,
            crate::dto::session::ImageInput,
            crate::dto::session::SubmitFlagsRequest,
            crate::dto::session::SessionView,
            crate::dto::session::FlagView,
            crate::dto::sse::FlagsChangedEvent,
            crate::dto::sse::SessionClosedEvent,
            crate::dto::images::ImageResultView,
            crate::error::ErrorBody,
            crate::state::session::Side,
            crate::state::session::Phase,
            crate::state::session::FlagSource,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Two-player session lifecycle"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "images", description = "Image search proxy"),
    )
)]
pub struct ApiDoc;
