//! The per-activation tile provider and its load pipeline.
//!
//! A [`TileProvider`] is the authority for one activated overlay: it creates
//! [`OverlayTile`]s for requested rectangles, runs the concurrent load
//! pipeline, enforces the throttled-load limit, and accounts the bytes of
//! every image it holds in memory.
//!
//! # Load pipeline
//!
//! ```text
//! Unloaded ──► Loading ──► fetch (source, async) ──► decode/validate/prepare
//!                              │                        (blocking worker)
//!                              ▼                                │
//!                       panic or error ────────────────────────►│
//!                                                               ▼
//!                                            commit onto tile (Loaded/Failed),
//!                                            byte accounting, counter release
//! ```
//!
//! Counters are balanced on every path: panics in the fetch future or the
//! worker stage are caught and converted into the same Failed commit a
//! normal failure produces.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::asset::BoxFuture;
use crate::credit::Credit;
use crate::geometry::{Ellipsoid, Projection, Rectangle, Vec2};
use crate::image_data::DecodedImage;
use crate::overlay::{Externals, Overlay, TileProviderConfig};
use crate::preparer::{PrepareRendererResources, RendererResources};
use crate::tile::{MoreDetailAvailable, OverlayId, OverlayTile, TileLoadState};

/// Result of an overlay source's image fetch.
///
/// `image == None` means the fetch failed; `errors` says why. The rectangle
/// is the region the image actually covers, which may differ from the
/// requested rectangle (pixel alignment, coverage clamping).
pub struct LoadedOverlayImage {
    pub image: Option<Arc<DecodedImage>>,
    pub rectangle: Rectangle,
    pub credits: Vec<Credit>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub more_detail_available: bool,
}

impl LoadedOverlayImage {
    /// A failed fetch for the given rectangle.
    pub fn failure(rectangle: Rectangle, error: impl Into<String>) -> Self {
        Self {
            image: None,
            rectangle,
            credits: Vec::new(),
            errors: vec![error.into()],
            warnings: Vec::new(),
            more_detail_available: false,
        }
    }
}

/// Per-source image fetch boundary.
///
/// Implementations translate a rectangle/resolution request into imagery,
/// usually by building a URL and going through the asset fetcher. The
/// returned future is driven from a spawned task and must own its captures.
pub trait TileImageSource: Send + Sync {
    fn load_tile_image(
        &self,
        rectangle: Rectangle,
        target_resolution: Vec2,
    ) -> BoxFuture<'static, LoadedOverlayImage>;
}

/// Source that never produces imagery. Installed when an overlay's
/// activation handshake fails; combined with an empty coverage rectangle it
/// degrades the overlay to "no imagery" without stalling anything.
pub(crate) struct EmptyImageSource;

impl TileImageSource for EmptyImageSource {
    fn load_tile_image(
        &self,
        rectangle: Rectangle,
        _target_resolution: Vec2,
    ) -> BoxFuture<'static, LoadedOverlayImage> {
        Box::pin(async move { LoadedOverlayImage::failure(rectangle, "provider has no tiles") })
    }
}

/// The fields a finished load commits onto its tile.
pub(crate) struct LoadOutcome {
    pub(crate) state: TileLoadState,
    pub(crate) image: Option<Arc<DecodedImage>>,
    pub(crate) rectangle: Rectangle,
    pub(crate) credits: Vec<Credit>,
    pub(crate) renderer_resources: Option<RendererResources>,
    pub(crate) more_detail_available: MoreDetailAvailable,
}

impl LoadOutcome {
    pub(crate) fn failed() -> Self {
        Self {
            state: TileLoadState::Failed,
            image: None,
            rectangle: Rectangle::EMPTY,
            credits: Vec::new(),
            renderer_resources: None,
            more_detail_available: MoreDetailAvailable::No,
        }
    }
}

/// A resolved load: the provider together with the tile it loaded.
///
/// The tile is `None` when the load was refused (placeholder provider) or
/// was already started or resolved by an earlier call.
pub struct TileProviderAndTile {
    pub provider: Arc<TileProvider>,
    pub tile: Option<Arc<OverlayTile>>,
}

/// Per-activated-overlay tile factory and loader.
///
/// Created once per activation when the overlay's source handshake
/// completes; lives for the tileset session and is never recreated.
pub struct TileProvider {
    overlay: Arc<dyn Overlay>,
    overlay_id: OverlayId,
    externals: Externals,
    credit: Option<Credit>,
    projection: Projection,
    coverage_rectangle: Rectangle,
    source: Arc<dyn TileImageSource>,
    /// Present only on placeholder providers; the single shared tile
    /// returned for every request.
    placeholder_tile: Option<Arc<OverlayTile>>,
    tile_data_bytes: AtomicU64,
    total_tiles_loading: AtomicU32,
    throttled_tiles_loading: AtomicU32,
}

impl TileProvider {
    /// Builds a real provider from an overlay's handshake result.
    pub(crate) fn from_config(
        overlay: Arc<dyn Overlay>,
        overlay_id: OverlayId,
        externals: Externals,
        config: TileProviderConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            overlay,
            overlay_id,
            externals,
            credit: config.credit,
            projection: config.projection,
            coverage_rectangle: config.coverage_rectangle,
            source: config.source,
            placeholder_tile: None,
            tile_data_bytes: AtomicU64::new(0),
            total_tiles_loading: AtomicU32::new(0),
            throttled_tiles_loading: AtomicU32::new(0),
        })
    }

    /// Builds the placeholder provider for an activation, with its single
    /// shared placeholder tile.
    pub(crate) fn placeholder(
        overlay: Arc<dyn Overlay>,
        overlay_id: OverlayId,
        externals: Externals,
        ellipsoid: Ellipsoid,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            overlay,
            overlay_id,
            externals,
            credit: None,
            projection: Projection::Geographic(ellipsoid),
            coverage_rectangle: Rectangle::EMPTY,
            source: Arc::new(EmptyImageSource),
            placeholder_tile: Some(Arc::new(OverlayTile::placeholder(overlay_id, weak.clone()))),
            tile_data_bytes: AtomicU64::new(0),
            total_tiles_loading: AtomicU32::new(0),
            throttled_tiles_loading: AtomicU32::new(0),
        })
    }

    /// Builds the always-empty provider substituted on activation failure.
    pub(crate) fn empty(
        overlay: Arc<dyn Overlay>,
        overlay_id: OverlayId,
        externals: Externals,
        ellipsoid: Ellipsoid,
    ) -> Arc<Self> {
        Arc::new(Self {
            overlay,
            overlay_id,
            externals,
            credit: None,
            projection: Projection::Geographic(ellipsoid),
            coverage_rectangle: Rectangle::EMPTY,
            source: Arc::new(EmptyImageSource),
            placeholder_tile: None,
            tile_data_bytes: AtomicU64::new(0),
            total_tiles_loading: AtomicU32::new(0),
            throttled_tiles_loading: AtomicU32::new(0),
        })
    }

    /// The overlay this provider belongs to.
    pub fn overlay(&self) -> &Arc<dyn Overlay> {
        &self.overlay
    }

    /// Activation identity shared with this provider's sibling placeholder.
    pub fn overlay_id(&self) -> OverlayId {
        self.overlay_id
    }

    /// External systems this provider loads through.
    pub fn externals(&self) -> &Externals {
        &self.externals
    }

    /// Overlay-wide attribution credit, if any.
    pub fn credit(&self) -> Option<&Credit> {
        self.credit.as_ref()
    }

    /// Projection of this provider's tiling scheme.
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Region this provider has data for.
    pub fn coverage_rectangle(&self) -> Rectangle {
        self.coverage_rectangle
    }

    /// True for the stand-in provider used before activation completes.
    pub fn is_placeholder(&self) -> bool {
        self.placeholder_tile.is_some()
    }

    /// Total bytes of decoded imagery currently held by this provider's
    /// live tiles.
    pub fn tile_data_bytes(&self) -> u64 {
        self.tile_data_bytes.load(Ordering::SeqCst)
    }

    /// Number of tiles currently loading (throttled or not).
    pub fn tiles_loading(&self) -> u32 {
        self.total_tiles_loading.load(Ordering::SeqCst)
    }

    /// Number of tiles currently loading through the throttled path.
    pub fn throttled_tiles_loading(&self) -> u32 {
        self.throttled_tiles_loading.load(Ordering::SeqCst)
    }

    /// Requests a tile covering `rectangle` at roughly `target_resolution`
    /// screen pixels.
    ///
    /// A placeholder provider always returns its single shared placeholder
    /// tile. Otherwise, returns `None` when the rectangle does not overlap
    /// this provider's coverage (the overlay contributes nothing there), or
    /// a fresh `Unloaded` tile.
    pub fn get_tile(
        self: &Arc<Self>,
        rectangle: Rectangle,
        target_resolution: Vec2,
    ) -> Option<Arc<OverlayTile>> {
        if let Some(placeholder) = &self.placeholder_tile {
            return Some(Arc::clone(placeholder));
        }

        if !rectangle.overlaps(&self.coverage_rectangle) {
            return None;
        }

        Some(Arc::new(OverlayTile::real(
            self.overlay_id,
            Arc::downgrade(self),
            rectangle,
            target_resolution,
        )))
    }

    /// Starts loading `tile`, bypassing the throttle. No-op unless the tile
    /// is `Unloaded`. Used for tiles already decided to be necessary.
    ///
    /// The returned handle resolves when the load commits; dropping it does
    /// not cancel the load.
    pub fn load(self: &Arc<Self>, tile: &Arc<OverlayTile>) -> JoinHandle<TileProviderAndTile> {
        if self.is_placeholder() {
            // Placeholder tiles never load.
            let provider = Arc::clone(self);
            return tokio::spawn(async move {
                TileProviderAndTile {
                    provider,
                    tile: None,
                }
            });
        }

        self.do_load(Arc::clone(tile), false)
    }

    /// Starts loading `tile` if the throttle allows.
    ///
    /// Returns true when the load was started or the tile is already
    /// loading or resolved; false when the concurrent throttled-load limit
    /// is saturated, in which case nothing changes and the caller should
    /// retry on a later frame.
    pub fn load_throttled(self: &Arc<Self>, tile: &Arc<OverlayTile>) -> bool {
        if self.is_placeholder() || tile.state() != TileLoadState::Unloaded {
            return true;
        }

        let limit = self.overlay.options().maximum_simultaneous_tile_loads;
        if self.throttled_tiles_loading.load(Ordering::SeqCst) >= limit {
            return false;
        }

        self.do_load(Arc::clone(tile), true);
        true
    }

    /// Called by a tile's `Drop` when its reference count reaches zero.
    /// Never runs while the tile is Loading, because the in-flight pipeline
    /// task holds its own counted reference.
    pub(crate) fn remove_tile(&self, committed_bytes: u64) {
        if committed_bytes > 0 {
            self.tile_data_bytes
                .fetch_sub(committed_bytes, Ordering::SeqCst);
        }
    }

    fn do_load(
        self: &Arc<Self>,
        tile: Arc<OverlayTile>,
        throttled: bool,
    ) -> JoinHandle<TileProviderAndTile> {
        let provider = Arc::clone(self);

        if !tile.try_begin_loading() {
            // Already loading or resolved; exactly one pipeline per tile.
            return tokio::spawn(async move {
                TileProviderAndTile {
                    provider,
                    tile: None,
                }
            });
        }

        self.begin_tile_load(throttled);
        debug!(
            overlay = self.overlay.name(),
            rectangle = ?tile.rectangle(),
            throttled,
            "Starting overlay tile load"
        );

        let source = Arc::clone(&self.source);
        let rectangle = tile.rectangle();
        let target_resolution = tile.target_resolution();

        tokio::spawn(async move {
            let fetched = AssertUnwindSafe(source.load_tile_image(rectangle, target_resolution))
                .catch_unwind()
                .await;

            let outcome = match fetched {
                Ok(loaded) => {
                    let preparer = provider.externals.preparer.clone();
                    let worker =
                        tokio::task::spawn_blocking(move || outcome_from_loaded_image(preparer, loaded));
                    match worker.await {
                        Ok(outcome) => outcome,
                        Err(join_error) => {
                            error!(
                                overlay = provider.overlay.name(),
                                error = %join_error,
                                "Overlay image preparation panicked"
                            );
                            LoadOutcome::failed()
                        }
                    }
                }
                Err(_panic) => {
                    error!(
                        overlay = provider.overlay.name(),
                        ?rectangle,
                        "Overlay image fetch panicked"
                    );
                    LoadOutcome::failed()
                }
            };

            // Commit on the state-owning side: tile fields, byte accounting
            // (sized once, here), then counter release.
            let state = outcome.state;
            let committed = tile.commit(outcome);
            if committed > 0 {
                provider.tile_data_bytes.fetch_add(committed, Ordering::SeqCst);
            }
            provider.finalize_tile_load(throttled);

            debug!(
                overlay = provider.overlay.name(),
                ?state,
                bytes = committed,
                "Overlay tile load resolved"
            );

            TileProviderAndTile {
                provider: Arc::clone(&provider),
                tile: Some(tile),
            }
        })
    }

    fn begin_tile_load(&self, throttled: bool) {
        self.total_tiles_loading.fetch_add(1, Ordering::SeqCst);
        if throttled {
            self.throttled_tiles_loading.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn finalize_tile_load(&self, throttled: bool) {
        self.total_tiles_loading.fetch_sub(1, Ordering::SeqCst);
        if throttled {
            self.throttled_tiles_loading.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Worker-side stage: validates the fetched image and runs the renderer's
/// load-context hook, producing the outcome to commit.
fn outcome_from_loaded_image(
    preparer: Option<Arc<dyn PrepareRendererResources>>,
    loaded: LoadedOverlayImage,
) -> LoadOutcome {
    let Some(image) = loaded.image else {
        for message in &loaded.errors {
            error!(error = %message, "Failed to load overlay image");
        }
        return LoadOutcome::failed();
    };

    for message in &loaded.warnings {
        warn!(warning = %message, "Overlay image loaded with warnings");
    }

    if !image.is_consistent() {
        error!(
            width = image.width(),
            height = image.height(),
            bytes = image.size_bytes(),
            "Overlay image pixel data inconsistent with its dimensions"
        );
        return LoadOutcome::failed();
    }

    let renderer_resources = preparer
        .as_deref()
        .and_then(|p| p.prepare_in_load_context(&image));

    LoadOutcome {
        state: TileLoadState::Loaded,
        image: Some(image),
        rectangle: loaded.rectangle,
        credits: loaded.credits,
        renderer_resources,
        more_detail_available: if loaded.more_detail_available {
            MoreDetailAvailable::Yes
        } else {
            MoreDetailAvailable::No
        },
    }
}
