use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::services::image_search::{ImageSearchResult, MAX_PER_PAGE};

/// Query string of `GET /images/search`.
#[derive(Debug, Deserialize, IntoParams, Validate)]
#[into_params(parameter_in = Query)]
pub struct ImageSearchQuery {
    /// Free text; omitted or blank lists curated images.
    #[validate(length(max = 200))]
    pub query: Option<String>,
    /// One-based page number.
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    /// Results per page.
    #[validate(range(min = 1, max = MAX_PER_PAGE))]
    pub per_page: Option<u32>,
}

/// One candidate image.
#[derive(Debug, Serialize, ToSchema)]
pub struct ImageResultView {
    pub id: String,
    pub url: String,
    pub thumbnail_url: String,
    pub photographer: String,
    pub alt: String,
}

impl From<ImageSearchResult> for ImageResultView {
    fn from(value: ImageSearchResult) -> Self {
        Self {
            id: value.id,
            url: value.url,
            thumbnail_url: value.thumbnail_url,
            photographer: value.photographer,
            alt: value.alt,
        }
    }
}
