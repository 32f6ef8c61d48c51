//! Overlay source for servers addressed by a bounding-box URL template.
//!
//! The template carries `{minx}`, `{miny}`, `{maxx}`, `{maxy}`, `{width}`
//! and `{height}` placeholders, filled per request from the projected
//! rectangle and the desired pixel size:
//!
//! ```ignore
//! let overlay = UrlTemplateOverlay::new(
//!     "basemap",
//!     "https://maps.example.com/export?bbox={minx},{miny},{maxx},{maxy}&size={width},{height}",
//! )
//! .with_attribution("Example Imagery");
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::asset::{AssetFetcher, BoxFuture};
use crate::credit::Credit;
use crate::error::OverlayLoadFailure;
use crate::geometry::{Ellipsoid, Projection, Rectangle, Vec2};
use crate::overlay::{Externals, Overlay, OverlayOptions, TileProviderConfig};
use crate::provider::{LoadedOverlayImage, TileImageSource};
use crate::sources::{load_tile_image_from_url, UrlImageOptions};

/// Largest image dimension requested from the server, in pixels.
pub const DEFAULT_MAXIMUM_TEXTURE_SIZE: u32 = 2048;

const PLACEHOLDERS: [&str; 6] = ["{minx}", "{miny}", "{maxx}", "{maxy}", "{width}", "{height}"];

fn build_url(template: &str, rectangle: &Rectangle, width: u32, height: u32) -> String {
    template
        .replace("{minx}", &rectangle.min_x.to_string())
        .replace("{miny}", &rectangle.min_y.to_string())
        .replace("{maxx}", &rectangle.max_x.to_string())
        .replace("{maxy}", &rectangle.max_y.to_string())
        .replace("{width}", &width.to_string())
        .replace("{height}", &height.to_string())
}

/// Image source resolving requests through a bounding-box URL template.
pub struct UrlTemplateSource {
    fetcher: Arc<dyn AssetFetcher>,
    url_template: String,
    headers: Vec<(String, String)>,
    coverage_rectangle: Rectangle,
    credits: Vec<Credit>,
    maximum_texture_size: u32,
}

impl UrlTemplateSource {
    pub fn new(
        fetcher: Arc<dyn AssetFetcher>,
        url_template: String,
        headers: Vec<(String, String)>,
        coverage_rectangle: Rectangle,
        credits: Vec<Credit>,
        maximum_texture_size: u32,
    ) -> Self {
        Self {
            fetcher,
            url_template,
            headers,
            coverage_rectangle,
            credits,
            maximum_texture_size,
        }
    }
}

impl TileImageSource for UrlTemplateSource {
    fn load_tile_image(
        &self,
        rectangle: Rectangle,
        target_resolution: Vec2,
    ) -> BoxFuture<'static, LoadedOverlayImage> {
        // Never request outside the server's coverage.
        let requested = rectangle
            .intersection(&self.coverage_rectangle)
            .unwrap_or(rectangle);

        let maximum = self.maximum_texture_size;
        let width = (target_resolution.x.ceil() as u32).clamp(1, maximum);
        let height = (target_resolution.y.ceil() as u32).clamp(1, maximum);
        // The server could have answered a larger request with more pixels.
        let more_detail_available = target_resolution.x > f64::from(maximum)
            || target_resolution.y > f64::from(maximum);

        let url = build_url(&self.url_template, &requested, width, height);
        debug!(%url, width, height, "Requesting overlay image");

        let fetcher = Arc::clone(&self.fetcher);
        let headers = self.headers.clone();
        let options = UrlImageOptions {
            rectangle: requested,
            credits: self.credits.clone(),
            more_detail_available,
        };
        Box::pin(load_tile_image_from_url(fetcher, url, headers, options))
    }
}

/// Overlay whose imagery comes from a bounding-box URL template.
pub struct UrlTemplateOverlay {
    name: String,
    url_template: String,
    headers: Vec<(String, String)>,
    options: OverlayOptions,
    projection: Projection,
    coverage_rectangle: Option<Rectangle>,
    attribution: Option<String>,
    maximum_texture_size: u32,
}

impl UrlTemplateOverlay {
    pub fn new(name: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_template: url_template.into(),
            headers: Vec::new(),
            options: OverlayOptions::default(),
            projection: Projection::Geographic(Ellipsoid::WGS84),
            coverage_rectangle: None,
            attribution: None,
            maximum_texture_size: DEFAULT_MAXIMUM_TEXTURE_SIZE,
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_options(mut self, options: OverlayOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Restricts the overlay to a region; defaults to the projection's
    /// maximum rectangle.
    pub fn with_coverage_rectangle(mut self, rectangle: Rectangle) -> Self {
        self.coverage_rectangle = Some(rectangle);
        self
    }

    pub fn with_attribution(mut self, attribution: impl Into<String>) -> Self {
        self.attribution = Some(attribution.into());
        self
    }

    pub fn with_maximum_texture_size(mut self, size: u32) -> Self {
        self.maximum_texture_size = size;
        self
    }
}

impl Overlay for UrlTemplateOverlay {
    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> &OverlayOptions {
        &self.options
    }

    fn create_tile_provider(
        &self,
        externals: &Externals,
    ) -> BoxFuture<'static, Result<TileProviderConfig, OverlayLoadFailure>> {
        let name = self.name.clone();
        let url_template = self.url_template.clone();
        let headers = self.headers.clone();
        let projection = self.projection;
        let coverage_rectangle = self
            .coverage_rectangle
            .unwrap_or_else(|| projection.maximum_rectangle());
        let show_on_screen = self.options.show_credits_on_screen;
        let maximum_texture_size = self.maximum_texture_size;

        let credit = self.attribution.as_ref().map(|text| {
            match &externals.credit_system {
                Some(credit_system) => credit_system.create_credit(text, show_on_screen),
                None => Credit::new(text.as_str(), show_on_screen),
            }
        });
        let fetcher = Arc::clone(&externals.asset_fetcher);

        Box::pin(async move {
            if !PLACEHOLDERS.iter().any(|p| url_template.contains(p)) {
                return Err(OverlayLoadFailure {
                    overlay_name: name,
                    message: format!("URL template '{url_template}' contains no placeholders"),
                });
            }

            let credits = credit.iter().cloned().collect();
            let source = UrlTemplateSource::new(
                fetcher,
                url_template,
                headers,
                coverage_rectangle,
                credits,
                maximum_texture_size,
            );

            Ok(TileProviderConfig {
                credit,
                projection,
                coverage_rectangle,
                source: Arc::new(source),
            })
        })
    }
}
