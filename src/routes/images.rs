use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use validator::Validate;

use crate::{
    dto::images::{ImageResultView, ImageSearchQuery},
    error::{AppError, ErrorBody},
    services::image_search,
    state::SharedState,
};

/// Routes proxying the image search provider.
pub fn router() -> Router<SharedState> {
    Router::new().route("/images/search", get(search_images))
}

/// Search candidate flag images; without a query, curated images are listed.
#[utoipa::path(
    get,
    path = "/images/search",
    tag = "images",
    params(ImageSearchQuery),
    responses(
        (status = 200, description = "Matching images", body = [ImageResultView]),
        (status = 502, description = "Image provider failed", body = ErrorBody)
    )
)]
pub async fn search_images(
    State(state): State<SharedState>,
    Query(params): Query<ImageSearchQuery>,
) -> Result<Json<Vec<ImageResultView>>, AppError> {
    params.validate()?;
    let results =
        image_search::search_images(&state, params.query, params.page, params.per_page).await?;
    Ok(Json(results.into_iter().map(Into::into).collect()))
}
