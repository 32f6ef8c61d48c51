//! Streaming raster overlays for 3D terrain tilesets.
//!
//! This crate loads 2D map imagery (satellite photos, street maps, weather
//! layers) and drapes it over a tree of 3D geometry tiles whose subdivision
//! does not match the imagery's own tiling. It handles the full lifecycle:
//! activating an overlay against a tileset session, throttled asynchronous
//! image loading, and per-geometry-tile attachment with UV remapping so an
//! imagery tile of any footprint can texture any geometry tile it covers.
//!
//! # Architecture
//!
//! - [`overlay`] — the [`Overlay`](overlay::Overlay) trait: one imagery
//!   source definition and its options.
//! - [`activated`] — [`ActivatedOverlay`](activated::ActivatedOverlay): an
//!   overlay attached to a session, with a placeholder provider that serves
//!   requests while the real one is still handshaking.
//! - [`provider`] — [`TileProvider`](provider::TileProvider): creates
//!   overlay tiles and runs the load pipeline (fetch, decode, validate,
//!   renderer preparation) with balanced load counters and byte accounting.
//! - [`tile`] — [`OverlayTile`](tile::OverlayTile): one loadable piece of
//!   imagery, shared by reference counting.
//! - [`mapped`] — [`MappedTile`](mapped::MappedTile): binds overlay imagery
//!   to a geometry tile, falling back to ancestor imagery while loads are
//!   pending or after they fail.
//! - [`sources`] — ready-made image sources, including the bounding-box URL
//!   template source.
//!
//! # Example
//!
//! ```ignore
//! use rasterlayer::activated::ActivatedOverlay;
//! use rasterlayer::asset::{CachingFetcher, ReqwestFetcher};
//! use rasterlayer::overlay::Externals;
//! use rasterlayer::sources::UrlTemplateOverlay;
//! use std::sync::Arc;
//!
//! let fetcher = Arc::new(CachingFetcher::new(Arc::new(ReqwestFetcher::new()?)));
//! let externals = Externals::new(fetcher);
//!
//! let overlay = Arc::new(UrlTemplateOverlay::new(
//!     "basemap",
//!     "https://maps.example.com/export?bbox={minx},{miny},{maxx},{maxy}&size={width},{height}",
//! ));
//!
//! let activated = ActivatedOverlay::activate(overlay, &externals);
//! activated.ready().await;
//! ```

pub mod activated;
pub mod asset;
pub mod credit;
pub mod error;
pub mod geometry;
pub mod image_data;
pub mod mapped;
pub mod overlay;
pub mod preparer;
pub mod provider;
pub mod sources;
pub mod tile;
pub mod tileset;

pub use activated::ActivatedOverlay;
pub use asset::{AssetFetcher, AssetResponse, CachingFetcher, ReqwestFetcher};
pub use credit::{Credit, CreditSystem};
pub use error::{OverlayError, OverlayLoadFailure};
pub use geometry::{Ellipsoid, GlobeRectangle, Projection, Rectangle, Vec2};
pub use image_data::DecodedImage;
pub use mapped::{map_overlay_to_tile, AttachmentState, MappedTile};
pub use overlay::{Externals, Overlay, OverlayOptions, TileProviderConfig};
pub use preparer::{NoopPreparer, PrepareRendererResources, RendererResources};
pub use provider::{LoadedOverlayImage, TileImageSource, TileProvider, TileProviderAndTile};
pub use sources::{UrlTemplateOverlay, UrlTemplateSource};
pub use tile::{MoreDetailAvailable, OverlayTile, TileLoadState};
pub use tileset::{GeometryTile, OverlayDetails, TileArena, TileKey};
