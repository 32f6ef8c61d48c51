//! Ready-made overlay image sources.
//!
//! [`load_tile_image_from_url`] is the shared building block: it fetches one
//! image over the asset boundary, decodes it on a blocking worker, and folds
//! transport and decode problems into the returned [`LoadedOverlayImage`] so
//! they surface as a failed tile rather than an error the pipeline has to
//! unwind.

mod url_template;

pub use url_template::{UrlTemplateOverlay, UrlTemplateSource};

use std::sync::Arc;

use crate::asset::AssetFetcher;
use crate::credit::Credit;
use crate::error::OverlayError;
use crate::geometry::Rectangle;
use crate::provider::LoadedOverlayImage;

/// Per-request parameters for [`load_tile_image_from_url`].
pub struct UrlImageOptions {
    /// Projected region the fetched image covers.
    pub rectangle: Rectangle,
    /// Credits to carry on the resulting tile.
    pub credits: Vec<Credit>,
    /// Whether imagery more detailed than this request exists.
    pub more_detail_available: bool,
}

/// Fetches and decodes one overlay image from a URL.
pub async fn load_tile_image_from_url(
    fetcher: Arc<dyn AssetFetcher>,
    url: String,
    headers: Vec<(String, String)>,
    options: UrlImageOptions,
) -> LoadedOverlayImage {
    let response = match fetcher.get(&url, &headers).await {
        Ok(response) => response,
        Err(error) => return LoadedOverlayImage::failure(options.rectangle, error.to_string()),
    };

    if !(200..300).contains(&response.status) {
        let error = OverlayError::HttpStatus {
            status: response.status,
            url,
        };
        return LoadedOverlayImage::failure(options.rectangle, error.to_string());
    }

    if response.data.is_empty() {
        let error = OverlayError::EmptyResponse { url };
        return LoadedOverlayImage::failure(options.rectangle, error.to_string());
    }

    let data = response.data;
    let decoded = tokio::task::spawn_blocking(move || crate::image_data::decode_image(&data)).await;

    match decoded {
        Ok(Ok(image)) => LoadedOverlayImage {
            image: Some(Arc::new(image)),
            rectangle: options.rectangle,
            credits: options.credits,
            errors: Vec::new(),
            warnings: Vec::new(),
            more_detail_available: options.more_detail_available,
        },
        Ok(Err(error)) => LoadedOverlayImage::failure(
            options.rectangle,
            format!("Failed to decode image from {url}: {error}"),
        ),
        Err(join_error) => LoadedOverlayImage::failure(
            options.rectangle,
            format!("Image decode panicked for {url}: {join_error}"),
        ),
    }
}
