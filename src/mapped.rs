//! Binding overlay imagery to geometry tiles.
//!
//! A [`MappedTile`] associates one overlay's imagery with one geometry tile.
//! Its `update` step drives the mapping toward the best imagery currently
//! available: a finished load is promoted and attached, a failed load falls
//! back to the closest ancestor mapped to the same overlay, and while a load
//! is still in flight the closest loaded ancestor's imagery is attached
//! temporarily so the tile is never textureless.
//!
//! Because an ancestor's imagery covers more ground than the tile it is
//! attached to, every attachment carries a translation/scale pair that remaps
//! the tile's UV coordinates into the attached image:
//!
//! ```text
//! uv_in_image = uv_of_geometry * scale + translation
//! ```

use std::sync::Arc;

use tracing::trace;

use crate::activated::ActivatedOverlay;
use crate::geometry::{Projection, Rectangle, Vec2};
use crate::preparer::PrepareRendererResources;
use crate::tile::{MoreDetailAvailable, OverlayId, OverlayTile, TileLoadState};
use crate::tileset::{GeometryTile, TileArena, TileKey};

/// Attachment status of a mapping's ready imagery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    /// No imagery is attached to the geometry tile.
    Unattached,
    /// Interim imagery (usually an ancestor's) is attached while the
    /// mapping's own load is still in flight.
    TemporarilyAttached,
    /// The mapping's final imagery is attached.
    Attached,
}

/// One overlay's imagery mapped to one geometry tile.
pub struct MappedTile {
    loading_tile: Option<Arc<OverlayTile>>,
    ready_tile: Option<Arc<OverlayTile>>,
    texture_coordinate_index: Option<u32>,
    translation: Vec2,
    scale: Vec2,
    state: AttachmentState,
    original_failed: bool,
}

impl MappedTile {
    pub(crate) fn new(
        loading_tile: Option<Arc<OverlayTile>>,
        texture_coordinate_index: Option<u32>,
    ) -> Self {
        Self {
            loading_tile,
            ready_tile: None,
            texture_coordinate_index,
            translation: Vec2::ZERO,
            scale: Vec2::new(1.0, 1.0),
            state: AttachmentState::Unattached,
            original_failed: false,
        }
    }

    pub fn loading_tile(&self) -> Option<&Arc<OverlayTile>> {
        self.loading_tile.as_ref()
    }

    pub fn ready_tile(&self) -> Option<&Arc<OverlayTile>> {
        self.ready_tile.as_ref()
    }

    pub fn texture_coordinate_index(&self) -> Option<u32> {
        self.texture_coordinate_index
    }

    pub fn translation(&self) -> Vec2 {
        self.translation
    }

    pub fn scale(&self) -> Vec2 {
        self.scale
    }

    pub fn state(&self) -> AttachmentState {
        self.state
    }

    /// True once the mapping's own load has failed; the mapping may still
    /// show ancestor imagery, but it never reports more detail available.
    pub fn original_failed(&self) -> bool {
        self.original_failed
    }

    /// The activation identity of whichever overlay tile this mapping holds.
    pub fn overlay_id(&self) -> Option<OverlayId> {
        self.loading_tile
            .as_ref()
            .or(self.ready_tile.as_ref())
            .map(|t| t.overlay_id())
    }

    /// Starts the mapping's load through the throttled path. Returns false
    /// when the throttle refused and the caller should retry later.
    pub fn load_throttled(&self) -> bool {
        let Some(loading) = &self.loading_tile else {
            return true;
        };
        let Some(provider) = loading.provider() else {
            return true;
        };
        provider.load_throttled(loading)
    }

    /// Advances the mapping one step and reports whether more detailed
    /// imagery exists for this geometry tile.
    ///
    /// `Unknown` means a load is still pending and the answer will change;
    /// callers deciding whether to refine should treat it as "wait".
    pub fn update(&mut self, arena: &TileArena, key: TileKey) -> MoreDetailAvailable {
        // A fully attached mapping is final.
        if self.state == AttachmentState::Attached {
            return match (&self.ready_tile, self.original_failed) {
                (Some(ready), false) => ready.more_detail_available(),
                _ => MoreDetailAvailable::No,
            };
        }

        let Some(overlay_id) = self.overlay_id() else {
            return MoreDetailAvailable::No;
        };

        // A failed load falls back to the closest ancestor mapped to the
        // same overlay, adopting its in-flight load or, failing that, its
        // ready imagery. An ancestor whose adopted tile also failed keeps
        // the walk going.
        let mut ancestor = arena.parent_of(key);
        while self.loading_state() == Some(TileLoadState::Failed) {
            self.original_failed = true;
            let Some(k) = ancestor else { break };
            if let Some(mapping) = find_tile_overlay(arena.get(k), overlay_id) {
                if let Some(candidate) = mapping
                    .loading_tile
                    .as_ref()
                    .or(mapping.ready_tile.as_ref())
                {
                    self.loading_tile = Some(Arc::clone(candidate));
                }
            }
            ancestor = arena.parent_of(k);
        }

        // No ancestor could substitute. Imagery already chosen for this
        // tile stays on screen; only without any does the failed tile
        // itself count as attached, and it is never handed to the renderer.
        if self.loading_state() == Some(TileLoadState::Failed) {
            trace!(?key, "Overlay mapping resolved to terminal failure");
            if self.ready_tile.is_none() {
                self.ready_tile = self.loading_tile.take();
                self.state = AttachmentState::Attached;
                return MoreDetailAvailable::No;
            }
            self.loading_tile = None;
            if self.state == AttachmentState::TemporarilyAttached {
                self.state = AttachmentState::Attached;
            }
        }

        // Promote a finished load, replacing any interim attachment.
        if self.loading_state() == Some(TileLoadState::Loaded) {
            if self.ready_tile.is_some() && self.state != AttachmentState::Unattached {
                self.run_detach_hook(key);
                self.state = AttachmentState::Unattached;
            }
            self.ready_tile = self.loading_tile.take();
            self.compute_translation_and_scale(arena.get(key));
        }

        // While the load is in flight, borrow the closest loaded ancestor's
        // imagery so the tile is never textureless.
        if self.loading_tile.is_some() {
            let mut candidate = None;
            let mut cursor = arena.parent_of(key);
            while let Some(k) = cursor {
                if let Some(mapping) = find_tile_overlay(arena.get(k), overlay_id) {
                    if let Some(ready) = &mapping.ready_tile {
                        if ready.state() == TileLoadState::Loaded {
                            candidate = Some(Arc::clone(ready));
                            break;
                        }
                    }
                }
                cursor = arena.parent_of(k);
            }

            if let Some(candidate) = candidate {
                let unchanged = self
                    .ready_tile
                    .as_ref()
                    .is_some_and(|ready| Arc::ptr_eq(ready, &candidate));
                if !unchanged {
                    if self.state != AttachmentState::Unattached {
                        self.run_detach_hook(key);
                        self.state = AttachmentState::Unattached;
                    }
                    self.ready_tile = Some(candidate);
                    self.compute_translation_and_scale(arena.get(key));
                }
            }
        }

        // Attach whatever is ready now.
        if self.state == AttachmentState::Unattached {
            if let Some(ready) = &self.ready_tile {
                if ready.state() == TileLoadState::Failed {
                    self.state = AttachmentState::Attached;
                } else {
                    if let Some(preparer) = preparer_of(ready) {
                        preparer.attach(
                            key,
                            self.texture_coordinate_index,
                            ready,
                            self.translation,
                            self.scale,
                        );
                    }
                    self.state = if self.loading_tile.is_some() {
                        AttachmentState::TemporarilyAttached
                    } else {
                        AttachmentState::Attached
                    };
                }
            }
        }

        if self.original_failed {
            return MoreDetailAvailable::No;
        }
        if self.loading_tile.is_some() {
            return MoreDetailAvailable::Unknown;
        }
        match &self.ready_tile {
            Some(ready) => ready.more_detail_available(),
            None => MoreDetailAvailable::No,
        }
    }

    /// Detaches this mapping's imagery from the geometry tile. Idempotent.
    pub fn detach_from_tile(&mut self, key: TileKey) {
        if self.state == AttachmentState::Unattached {
            return;
        }
        self.run_detach_hook(key);
        self.state = AttachmentState::Unattached;
    }

    fn run_detach_hook(&self, key: TileKey) {
        let Some(ready) = &self.ready_tile else {
            return;
        };
        // A failed tile was never given to the renderer, so there is
        // nothing to detach.
        if ready.state() == TileLoadState::Failed {
            return;
        }
        if let Some(preparer) = preparer_of(ready) {
            preparer.detach(key, self.texture_coordinate_index, ready);
        }
    }

    fn loading_state(&self) -> Option<TileLoadState> {
        self.loading_tile.as_ref().map(|t| t.state())
    }

    /// Recomputes the UV remap from the geometry tile's precise rectangle
    /// to the ready tile's imagery rectangle.
    fn compute_translation_and_scale(&mut self, geometry: &GeometryTile) {
        let Some(ready) = &self.ready_tile else {
            return;
        };
        let Some(provider) = ready.provider() else {
            return;
        };
        let Some(details) = geometry.overlay_details() else {
            return;
        };
        let Some((_, geometry_rectangle)) = details.find_rectangle(provider.projection()) else {
            return;
        };

        let imagery_rectangle = ready.rectangle();
        let terrain_width = geometry_rectangle.width();
        let terrain_height = geometry_rectangle.height();
        if imagery_rectangle.is_empty() || terrain_width <= 0.0 || terrain_height <= 0.0 {
            return;
        }

        let scale_x = terrain_width / imagery_rectangle.width();
        let scale_y = terrain_height / imagery_rectangle.height();
        self.translation = Vec2::new(
            (scale_x * (geometry_rectangle.min_x - imagery_rectangle.min_x)) / terrain_width,
            (scale_y * (geometry_rectangle.min_y - imagery_rectangle.min_y)) / terrain_height,
        );
        self.scale = Vec2::new(scale_x, scale_y);
    }
}

impl std::fmt::Debug for MappedTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedTile")
            .field("state", &self.state)
            .field("loading", &self.loading_tile.is_some())
            .field("ready", &self.ready_tile.is_some())
            .field("texture_coordinate_index", &self.texture_coordinate_index)
            .field("original_failed", &self.original_failed)
            .finish()
    }
}

/// Finds the mapping on `tile` that belongs to the given overlay
/// activation, if any.
pub fn find_tile_overlay(tile: &GeometryTile, overlay_id: OverlayId) -> Option<&MappedTile> {
    tile.mapped_overlays()
        .iter()
        .find(|mapping| mapping.overlay_id() == Some(overlay_id))
}

/// Screen-pixel resolution needed for overlay imagery on a tile with the
/// given geometric error and projected bounds.
fn desired_screen_pixels(
    geometric_error: f64,
    maximum_screen_space_error: f64,
    rectangle: &Rectangle,
) -> Vec2 {
    let error = geometric_error.max(f64::EPSILON);
    Vec2::new(rectangle.width(), rectangle.height()) * (maximum_screen_space_error / error)
}

/// Returns `projection`'s position in `missing_projections`, appending it
/// if it is not yet listed.
fn reserve_missing_projection(
    missing_projections: &mut Vec<Projection>,
    projection: Projection,
) -> usize {
    match missing_projections.iter().position(|p| *p == projection) {
        Some(i) => i,
        None => {
            missing_projections.push(projection);
            missing_projections.len() - 1
        }
    }
}

/// Maps `activated`'s imagery onto the geometry tile at `key`, appending a
/// new [`MappedTile`] to it.
///
/// Returns false when the overlay contributes nothing to this tile (the
/// tile is outside the overlay's coverage) and no mapping was created.
/// Projections the tile's geometry lacks texture coordinates for are added
/// to `missing_projections` so they can be generated with the content.
pub fn map_overlay_to_tile(
    activated: &ActivatedOverlay,
    arena: &mut TileArena,
    key: TileKey,
    missing_projections: &mut Vec<Projection>,
) -> bool {
    let provider = activated.current_provider();

    // Activation still pending: map the shared placeholder tile and let a
    // later pass replace it once the real provider exists.
    if provider.is_placeholder() {
        let Some(tile) = provider.get_tile(Rectangle::EMPTY, Vec2::ZERO) else {
            return false;
        };
        arena
            .get_mut(key)
            .mapped_overlays_mut()
            .push(MappedTile::new(Some(tile), None));
        return true;
    }

    let projection = *provider.projection();
    let maximum_screen_space_error = provider.overlay().options().maximum_screen_space_error;
    let geometry = arena.get(key);
    let geometric_error = geometry.geometric_error();

    let mapping = if let Some(details) = geometry.overlay_details() {
        match details.find_rectangle(&projection) {
            Some((index, rectangle)) => {
                let pixels =
                    desired_screen_pixels(geometric_error, maximum_screen_space_error, &rectangle);
                match provider.get_tile(rectangle, pixels) {
                    Some(tile) => MappedTile::new(Some(tile), Some(index)),
                    // Outside the overlay's coverage.
                    None => return false,
                }
            }
            None => {
                // The geometry has no texture coordinates for this
                // projection yet. Reserve a set past the existing ones and
                // map a placeholder until the coordinates are generated.
                let missing_index = reserve_missing_projection(missing_projections, projection);
                let index = (details.projections().len() + missing_index) as u32;
                match activated
                    .placeholder_provider()
                    .get_tile(Rectangle::EMPTY, Vec2::ZERO)
                {
                    Some(tile) => MappedTile::new(Some(tile), Some(index)),
                    None => return false,
                }
            }
        }
    } else {
        // Content not loaded yet, so texture coordinates for this
        // projection do not exist either; reserve a set for it now.
        let index = reserve_missing_projection(missing_projections, projection) as u32;
        if let Some(region) = geometry.region() {
            // Request coarse imagery from the tile's globe bounds.
            let rectangle = projection.project_rectangle(region);
            let pixels =
                desired_screen_pixels(geometric_error, maximum_screen_space_error, &rectangle);
            match provider.get_tile(rectangle, pixels) {
                Some(tile) => MappedTile::new(Some(tile), Some(index)),
                None => return false,
            }
        } else {
            // No geographic extent known at all; map a placeholder and
            // retry once the tile's content provides one.
            match activated
                .placeholder_provider()
                .get_tile(Rectangle::EMPTY, Vec2::ZERO)
            {
                Some(tile) => MappedTile::new(Some(tile), Some(index)),
                None => return false,
            }
        }
    };

    arena.get_mut(key).mapped_overlays_mut().push(mapping);
    true
}

fn preparer_of(tile: &OverlayTile) -> Option<Arc<dyn PrepareRendererResources>> {
    tile.provider()
        .and_then(|provider| provider.externals().preparer.clone())
}
