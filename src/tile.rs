//! The overlay tile cache entry.
//!
//! An [`OverlayTile`] represents one overlay image request/result for a
//! given rectangle and target resolution. It is shared by reference count:
//! every mapping holding it, plus any in-flight load continuation, owns an
//! `Arc` clone. When the last clone drops, the owning provider's byte
//! accounting is decremented.
//!
//! Two logically identical requests yield two distinct tiles; network-level
//! deduplication is the job of the asset fetcher below.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::credit::Credit;
use crate::geometry::{Rectangle, Vec2};
use crate::image_data::DecodedImage;
use crate::preparer::RendererResources;
use crate::provider::{LoadOutcome, TileProvider};

/// Identity of one overlay activation, shared by its placeholder and real
/// providers and stamped on every tile they create. Ancestor lookups match
/// mappings by this id.
pub type OverlayId = u64;

/// Lifecycle states of an overlay tile.
///
/// The only legal transitions are `Unloaded` → `Loading` →
/// {`Loaded`, `Failed`}; a tile never re-enters `Loading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileLoadState {
    /// Initial state; no load has started.
    Unloaded,
    /// A load is in flight.
    Loading,
    /// The image was fetched, decoded, and validated.
    Loaded,
    /// The request or image creation failed. Terminal.
    Failed,
}

/// Whether imagery more detailed than this tile exists for its area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoreDetailAvailable {
    No,
    Yes,
    /// Not yet known; callers must not treat the covered subtree as fully
    /// refined.
    Unknown,
}

#[derive(Debug)]
struct TileInner {
    state: TileLoadState,
    rectangle: Rectangle,
    credits: Vec<Credit>,
    image: Option<Arc<DecodedImage>>,
    renderer_resources: Option<RendererResources>,
    more_detail_available: MoreDetailAvailable,
    /// Image byte size captured once at commit, so that later image resizes
    /// cannot unbalance the provider's accounting.
    committed_bytes: u64,
}

/// One overlay image request/result.
///
/// Created by a [`TileProvider`]; mutated only by its load pipeline. Failure
/// is never surfaced as an error value, only as [`TileLoadState::Failed`].
pub struct OverlayTile {
    overlay_id: OverlayId,
    provider: Weak<TileProvider>,
    target_resolution: Vec2,
    inner: Mutex<TileInner>,
}

impl OverlayTile {
    /// Placeholder form: empty rectangle, zero target resolution. Used
    /// before a real provider exists or a precise rectangle is known.
    pub(crate) fn placeholder(overlay_id: OverlayId, provider: Weak<TileProvider>) -> Self {
        Self::real(overlay_id, provider, Rectangle::EMPTY, Vec2::ZERO)
    }

    /// Real request form. The provider has already validated that
    /// `rectangle` overlaps its coverage.
    pub(crate) fn real(
        overlay_id: OverlayId,
        provider: Weak<TileProvider>,
        rectangle: Rectangle,
        target_resolution: Vec2,
    ) -> Self {
        Self {
            overlay_id,
            provider,
            target_resolution,
            inner: Mutex::new(TileInner {
                state: TileLoadState::Unloaded,
                rectangle,
                credits: Vec::new(),
                image: None,
                renderer_resources: None,
                more_detail_available: MoreDetailAvailable::Unknown,
                committed_bytes: 0,
            }),
        }
    }

    /// Identity of the activation this tile belongs to.
    pub fn overlay_id(&self) -> OverlayId {
        self.overlay_id
    }

    /// The provider that created this tile, if it is still alive.
    pub fn provider(&self) -> Option<Arc<TileProvider>> {
        self.provider.upgrade()
    }

    /// Current load state.
    pub fn state(&self) -> TileLoadState {
        self.inner.lock().state
    }

    /// The rectangle this tile covers. Until the load commits this is the
    /// requested rectangle; afterwards it is the rectangle actually covered
    /// by the image, which may differ.
    pub fn rectangle(&self) -> Rectangle {
        self.inner.lock().rectangle
    }

    /// Screen-pixel resolution this tile is meant to cover.
    pub fn target_resolution(&self) -> Vec2 {
        self.target_resolution
    }

    /// Attribution credits for this tile's imagery.
    pub fn credits(&self) -> Vec<Credit> {
        self.inner.lock().credits.clone()
    }

    /// Decoded image, present once the tile is `Loaded`.
    pub fn image(&self) -> Option<Arc<DecodedImage>> {
        self.inner.lock().image.clone()
    }

    /// Opaque renderer handle produced by the load-context hook, if any.
    pub fn renderer_resources(&self) -> Option<RendererResources> {
        self.inner.lock().renderer_resources.clone()
    }

    /// Whether more detailed imagery exists for this tile's area.
    pub fn more_detail_available(&self) -> MoreDetailAvailable {
        self.inner.lock().more_detail_available
    }

    /// Transitions `Unloaded` → `Loading`. Returns false if the tile is in
    /// any other state, in which case the caller must not start a load.
    pub(crate) fn try_begin_loading(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == TileLoadState::Unloaded {
            inner.state = TileLoadState::Loading;
            true
        } else {
            false
        }
    }

    /// Commits a load outcome onto the tile and returns the image byte size
    /// now accounted against the provider, if any.
    pub(crate) fn commit(&self, outcome: LoadOutcome) -> u64 {
        let mut inner = self.inner.lock();
        debug_assert_eq!(inner.state, TileLoadState::Loading);

        inner.rectangle = outcome.rectangle;
        inner.credits = outcome.credits;
        inner.image = outcome.image;
        inner.renderer_resources = outcome.renderer_resources;
        inner.more_detail_available = outcome.more_detail_available;
        inner.state = outcome.state;

        inner.committed_bytes = inner
            .image
            .as_ref()
            .map(|image| image.size_bytes())
            .unwrap_or(0);
        inner.committed_bytes
    }
}

impl Drop for OverlayTile {
    fn drop(&mut self) {
        let bytes = self.inner.get_mut().committed_bytes;
        if let Some(provider) = self.provider.upgrade() {
            provider.remove_tile(bytes);
        }
    }
}

impl std::fmt::Debug for OverlayTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("OverlayTile")
            .field("overlay_id", &self.overlay_id)
            .field("state", &inner.state)
            .field("rectangle", &inner.rectangle)
            .field("target_resolution", &self.target_resolution)
            .finish()
    }
}
