//! The geometry-tile side of the overlay system.
//!
//! Geometry tiles are owned by an arena and addressed by [`TileKey`], which
//! keeps parent links cheap and lets a mapping walk its ancestor chain while
//! the tile it belongs to is being updated. Each tile carries the per-overlay
//! [`MappedTile`] entries that bind overlay imagery to it.

use crate::geometry::{GlobeRectangle, Projection, Rectangle};
use crate::mapped::MappedTile;
use crate::tile::MoreDetailAvailable;

/// Stable handle to a geometry tile in a [`TileArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey(usize);

/// Per-projection texture coordinate details of a renderable tile.
///
/// Index `i` of `projections` corresponds to texture coordinate set `i` on
/// the tile's geometry; `rectangles[i]` is the tile's bounds in that
/// projection's coordinates.
#[derive(Debug, Clone)]
pub struct OverlayDetails {
    projections: Vec<Projection>,
    rectangles: Vec<Rectangle>,
}

impl OverlayDetails {
    pub fn new(projections: Vec<Projection>, rectangles: Vec<Rectangle>) -> Self {
        debug_assert_eq!(projections.len(), rectangles.len());
        Self {
            projections,
            rectangles,
        }
    }

    pub fn projections(&self) -> &[Projection] {
        &self.projections
    }

    /// Looks up the texture coordinate set for `projection` and the tile's
    /// precise bounds in it.
    pub fn find_rectangle(&self, projection: &Projection) -> Option<(u32, Rectangle)> {
        self.projections
            .iter()
            .position(|p| p == projection)
            .map(|i| (i as u32, self.rectangles[i]))
    }
}

/// One tile of the geometry tree, as the overlay system sees it.
pub struct GeometryTile {
    parent: Option<TileKey>,
    geometric_error: f64,
    /// Coarse globe-coordinate bounds, available before the tile's content
    /// loads. Absent for tiles with no geographic extent.
    region: Option<GlobeRectangle>,
    /// Precise per-projection UV details, available once the tile's content
    /// has loaded.
    overlay_details: Option<OverlayDetails>,
    overlays: Vec<MappedTile>,
}

impl GeometryTile {
    pub fn new(parent: Option<TileKey>, geometric_error: f64) -> Self {
        Self {
            parent,
            geometric_error,
            region: None,
            overlay_details: None,
            overlays: Vec::new(),
        }
    }

    pub fn with_region(mut self, region: GlobeRectangle) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_overlay_details(mut self, details: OverlayDetails) -> Self {
        self.overlay_details = Some(details);
        self
    }

    pub fn parent(&self) -> Option<TileKey> {
        self.parent
    }

    pub fn geometric_error(&self) -> f64 {
        self.geometric_error
    }

    pub fn region(&self) -> Option<&GlobeRectangle> {
        self.region.as_ref()
    }

    pub fn overlay_details(&self) -> Option<&OverlayDetails> {
        self.overlay_details.as_ref()
    }

    /// Installs the precise UV details once the tile's content has loaded.
    pub fn set_overlay_details(&mut self, details: OverlayDetails) {
        self.overlay_details = Some(details);
    }

    /// The overlay imagery mapped to this tile.
    pub fn mapped_overlays(&self) -> &[MappedTile] {
        &self.overlays
    }

    pub fn mapped_overlays_mut(&mut self) -> &mut Vec<MappedTile> {
        &mut self.overlays
    }
}

/// Arena of geometry tiles for one tileset session.
///
/// Tiles are never removed; a session that unloads geometry drops the whole
/// arena. Keys therefore stay valid for the arena's lifetime.
#[derive(Default)]
pub struct TileArena {
    tiles: Vec<GeometryTile>,
}

impl TileArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tile: GeometryTile) -> TileKey {
        let key = TileKey(self.tiles.len());
        self.tiles.push(tile);
        key
    }

    pub fn get(&self, key: TileKey) -> &GeometryTile {
        &self.tiles[key.0]
    }

    pub fn get_mut(&mut self, key: TileKey) -> &mut GeometryTile {
        &mut self.tiles[key.0]
    }

    pub fn parent_of(&self, key: TileKey) -> Option<TileKey> {
        self.tiles[key.0].parent
    }

    /// Runs one update step for every overlay mapping of `key` and returns
    /// the aggregate more-detail answer across them.
    ///
    /// The mappings are moved out of the tile for the duration of the pass
    /// so each can consult the rest of the arena (ancestor mappings) while
    /// mutating itself.
    pub fn update_overlays(&mut self, key: TileKey) -> MoreDetailAvailable {
        let mut overlays = std::mem::take(&mut self.tiles[key.0].overlays);

        let mut aggregate = MoreDetailAvailable::No;
        for mapping in &mut overlays {
            let more_detail = mapping.update(self, key);
            aggregate = combine_more_detail(aggregate, more_detail);
        }

        self.tiles[key.0].overlays = overlays;
        aggregate
    }

    /// Detaches every overlay mapping of `key` from the renderer.
    pub fn detach_tile(&mut self, key: TileKey) {
        let mut overlays = std::mem::take(&mut self.tiles[key.0].overlays);
        for mapping in &mut overlays {
            mapping.detach_from_tile(key);
        }
        self.tiles[key.0].overlays = overlays;
    }
}

/// Combines per-overlay more-detail answers: a single `Unknown` makes the
/// aggregate `Unknown` (a load is still pending), otherwise any `Yes` wins.
pub fn combine_more_detail(
    a: MoreDetailAvailable,
    b: MoreDetailAvailable,
) -> MoreDetailAvailable {
    use MoreDetailAvailable::*;
    match (a, b) {
        (Unknown, _) | (_, Unknown) => Unknown,
        (Yes, _) | (_, Yes) => Yes,
        (No, No) => No,
    }
}
