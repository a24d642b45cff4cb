use futures::future::BoxFuture;
use thiserror::Error;
use tracing::warn;

use crate::{error::ServiceError, state::SharedState};

/// Largest page the provider accepts.
pub const MAX_PER_PAGE: u32 = 80;
/// Page size used when the caller does not pick one.
pub const DEFAULT_PER_PAGE: u32 = 20;

/// One candidate image returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSearchResult {
    /// Provider-side identifier, stable across searches.
    pub id: String,
    /// Full-size image URL.
    pub url: String,
    /// Thumbnail URL.
    pub thumbnail_url: String,
    /// Credited author.
    pub photographer: String,
    /// Alternative text.
    pub alt: String,
}

/// Failures talking to an image provider.
#[derive(Debug, Error)]
pub enum ImageSearchError {
    #[cfg(feature = "image-search")]
    #[error("failed to build HTTP client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    #[cfg(feature = "image-search")]
    #[error("request to image provider failed")]
    Request {
        #[source]
        source: reqwest::Error,
    },
    #[cfg(feature = "image-search")]
    #[error("image provider answered with status {status}")]
    Status { status: reqwest::StatusCode },
    #[error("malformed image provider response")]
    Decode {
        #[source]
        source: serde_json::Error,
    },
}

impl From<ImageSearchError> for ServiceError {
    fn from(err: ImageSearchError) -> Self {
        ServiceError::Upstream(err.to_string())
    }
}

/// Text search over a stock photo catalogue.
pub trait ImageSearchProvider: Send + Sync {
    fn search(
        &self,
        query: String,
        page: u32,
        per_page: u32,
    ) -> BoxFuture<'static, Result<Vec<ImageSearchResult>, ImageSearchError>>;
    /// Editor-picked images, used before the player typed anything.
    fn curated(
        &self,
        page: u32,
        per_page: u32,
    ) -> BoxFuture<'static, Result<Vec<ImageSearchResult>, ImageSearchError>>;
}

/// Search images for `query`; an empty query lists curated images instead.
///
/// Without a configured provider the result is empty.
pub async fn search_images(
    state: &SharedState,
    query: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
) -> Result<Vec<ImageSearchResult>, ServiceError> {
    let Some(provider) = state.image_search() else {
        warn!("image search requested but no provider is configured");
        return Ok(Vec::new());
    };

    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    let query = query
        .map(|query| query.trim().to_owned())
        .filter(|query| !query.is_empty());

    let results = match query {
        Some(query) => provider.search(query, page, per_page).await,
        None => provider.curated(page, per_page).await,
    };

    results.map_err(|err| {
        warn!(error = %err, "image search failed");
        err.into()
    })
}

pub mod pexels {
    //! Pexels-backed provider.

    use serde::Deserialize;

    use super::{ImageSearchError, ImageSearchResult};

    #[derive(Debug, Deserialize)]
    pub(super) struct SearchResponse {
        pub photos: Vec<Photo>,
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct Photo {
        pub id: u64,
        #[serde(default)]
        pub photographer: String,
        #[serde(default)]
        pub alt: String,
        pub src: PhotoSources,
    }

    #[derive(Debug, Deserialize)]
    pub(super) struct PhotoSources {
        pub large: String,
        pub medium: String,
    }

    /// Decode a Pexels listing, keeping the large rendition as the image and
    /// the medium one as the thumbnail.
    pub fn parse_photos(body: &[u8]) -> Result<Vec<ImageSearchResult>, ImageSearchError> {
        let response: SearchResponse = serde_json::from_slice(body)
            .map_err(|source| ImageSearchError::Decode { source })?;
        Ok(response
            .photos
            .into_iter()
            .map(|photo| ImageSearchResult {
                id: photo.id.to_string(),
                url: photo.src.large,
                thumbnail_url: photo.src.medium,
                photographer: photo.photographer,
                alt: photo.alt,
            })
            .collect())
    }

    #[cfg(feature = "image-search")]
    pub use self::client::PexelsProvider;

    #[cfg(feature = "image-search")]
    mod client {
        use std::sync::Arc;

        use futures::future::BoxFuture;
        use reqwest::Client;
        use tracing::warn;

        use super::parse_photos;
        use crate::services::image_search::{
            ImageSearchError, ImageSearchProvider, ImageSearchResult,
        };

        const PEXELS_API_URL: &str = "https://api.pexels.com/v1";

        /// Client for the Pexels REST API.
        #[derive(Clone)]
        pub struct PexelsProvider {
            client: Client,
            base_url: Arc<str>,
            api_key: Option<Arc<str>>,
        }

        impl PexelsProvider {
            /// Build a provider; without an API key every lookup yields an empty list.
            pub fn new(api_key: Option<String>) -> Result<Self, ImageSearchError> {
                Self::with_base_url(api_key, PEXELS_API_URL)
            }

            /// Same as [`PexelsProvider::new`] against another endpoint.
            pub fn with_base_url(
                api_key: Option<String>,
                base_url: &str,
            ) -> Result<Self, ImageSearchError> {
                let client = Client::builder()
                    .build()
                    .map_err(|source| ImageSearchError::ClientBuilder { source })?;
                Ok(Self {
                    client,
                    base_url: Arc::from(base_url.trim_end_matches('/')),
                    api_key: api_key.filter(|key| !key.is_empty()).map(Arc::from),
                })
            }

            async fn list(
                &self,
                path: &str,
                query: &[(&str, String)],
            ) -> Result<Vec<ImageSearchResult>, ImageSearchError> {
                let Some(api_key) = self.api_key.as_deref() else {
                    warn!("Pexels API key not configured");
                    return Ok(Vec::new());
                };

                let response = self
                    .client
                    .get(format!("{}/{path}", self.base_url))
                    .header(reqwest::header::AUTHORIZATION, api_key)
                    .query(query)
                    .send()
                    .await
                    .map_err(|source| ImageSearchError::Request { source })?;

                let status = response.status();
                if !status.is_success() {
                    return Err(ImageSearchError::Status { status });
                }

                let body = response
                    .bytes()
                    .await
                    .map_err(|source| ImageSearchError::Request { source })?;
                parse_photos(&body)
            }
        }

        impl ImageSearchProvider for PexelsProvider {
            fn search(
                &self,
                query: String,
                page: u32,
                per_page: u32,
            ) -> BoxFuture<'static, Result<Vec<ImageSearchResult>, ImageSearchError>> {
                let provider = self.clone();
                Box::pin(async move {
                    provider
                        .list(
                            "search",
                            &[
                                ("query", query),
                                ("page", page.to_string()),
                                ("per_page", per_page.to_string()),
                            ],
                        )
                        .await
                })
            }

            fn curated(
                &self,
                page: u32,
                per_page: u32,
            ) -> BoxFuture<'static, Result<Vec<ImageSearchResult>, ImageSearchError>> {
                let provider = self.clone();
                Box::pin(async move {
                    provider
                        .list(
                            "curated",
                            &[("page", page.to_string()), ("per_page", per_page.to_string())],
                        )
                        .await
                })
            }
        }
    }
}
