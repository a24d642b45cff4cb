/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Periodic purge of expired sessions.
pub mod housekeeping;
/// Image search provider abstraction and the Pexels client.
pub mod image_search;
/// Client-side mirror of one session, fed by subscriptions.
pub mod mirror;
/// Player coordinator combining the mirror, flag selection and countdown.
pub mod player;
/// Room code generation and normalization.
pub mod room_code;
/// Session lifecycle operations.
pub mod session_service;
/// Server-Sent Events streaming for session changes.
pub mod sse_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
/// In-process subscriptions to session and flag changes.
pub mod subscription;
/// Selection countdown.
pub mod timer;
